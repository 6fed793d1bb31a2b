//! Session contract tests.
//!
//! Exercises the provided trait methods against a minimal in-test session.

#![allow(clippy::unwrap_used)]

use async_trait::async_trait;
use pgx_session::{
    ConnectError, ConnectionParameters, DecodeError, ExecuteResult, Session, SessionError,
    SessionFactory, Value,
};

struct FixedSession {
    scalar: Value,
    closed: bool,
    close_calls: u32,
}

#[async_trait]
impl Session for FixedSession {
    async fn execute(&mut self, command: &str) -> pgx_session::Result<ExecuteResult> {
        if self.closed {
            return Err(SessionError::Closed);
        }
        Ok(ExecuteResult::new(command.to_uppercase(), 1))
    }

    async fn query_scalar(&mut self, _query: &str) -> pgx_session::Result<Value> {
        if self.closed {
            return Err(SessionError::Closed);
        }
        Ok(self.scalar.clone())
    }

    async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.close_calls += 1;
        }
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

struct FixedFactory;

#[async_trait]
impl SessionFactory for FixedFactory {
    type Session = FixedSession;

    async fn create_session(
        &self,
        params: &ConnectionParameters,
    ) -> Result<FixedSession, ConnectError> {
        if params.user() != "pgx_none" {
            return Err(ConnectError::Authentication {
                user: params.user().to_owned(),
                message: "role does not exist".into(),
            });
        }
        Ok(FixedSession {
            scalar: Value::Int4(7),
            closed: false,
            close_calls: 0,
        })
    }
}

fn params(user: &str) -> ConnectionParameters {
    ConnectionParameters::new("/private/tmp/.s.PGSQL.5432", user, "pgx_test")
}

#[tokio::test]
async fn test_typed_scalar_decodes() {
    let mut session = FixedFactory.create_session(&params("pgx_none")).await.unwrap();

    let n: i32 = session.scalar("select counter from t").await.unwrap();
    assert_eq!(n, 7);

    let wide: i64 = session.scalar("select counter from t").await.unwrap();
    assert_eq!(wide, 7);
}

#[tokio::test]
async fn test_typed_scalar_shape_mismatch() {
    let mut session = FixedFactory.create_session(&params("pgx_none")).await.unwrap();

    let result: pgx_session::Result<String> = session.scalar("select counter from t").await;
    let err = result.unwrap_err();
    assert!(matches!(
        err,
        SessionError::Decode(DecodeError::TypeMismatch { expected: "String", actual: "int4" })
    ));
}

#[tokio::test]
async fn test_close_is_idempotent() {
    let mut session = FixedFactory.create_session(&params("pgx_none")).await.unwrap();

    session.close().await;
    session.close().await;

    assert!(session.is_closed());
    assert_eq!(session.close_calls, 1);
    assert!(matches!(session.execute("select 1").await, Err(SessionError::Closed)));
}

#[test]
fn test_factory_classifies_errors() {
    let err = tokio_test::block_on(FixedFactory.create_session(&params("intruder")))
        .err()
        .unwrap();

    assert!(matches!(err, ConnectError::Authentication { .. }));
    assert!(!err.is_transient());
}
