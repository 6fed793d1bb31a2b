//! Test fixture utilities.

use pgx_session::Value;

use crate::mock_server::{MockResponse, MockServerBuilder, SessionScratch};

/// A per-session counter table, as used by the pool's cycle tests.
///
/// Each session gets its own temporary table holding a single integer.
/// Incrementing through the pool and reading every session's counter back
/// shows how the work was spread across sessions.
#[derive(Debug, Clone)]
pub struct CounterTable {
    /// Table name.
    pub table: String,
}

impl Default for CounterTable {
    fn default() -> Self {
        Self::new("t")
    }
}

impl CounterTable {
    /// Create a fixture for the named table.
    #[must_use]
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
        }
    }

    /// SQL that creates the temporary table.
    #[must_use]
    pub fn create_sql(&self) -> String {
        format!("create temporary table {}(counter integer not null)", self.table)
    }

    /// SQL that inserts the initial zero row.
    #[must_use]
    pub fn insert_sql(&self) -> String {
        format!("insert into {}(counter) values(0)", self.table)
    }

    /// SQL that increments the counter.
    #[must_use]
    pub fn increment_sql(&self) -> String {
        format!("update {} set counter = counter + 1", self.table)
    }

    /// SQL that reads the counter back.
    #[must_use]
    pub fn select_sql(&self) -> String {
        format!("select counter from {}", self.table)
    }

    /// Register the table's statements on a mock server builder.
    #[must_use]
    pub fn install(&self, builder: MockServerBuilder) -> MockServerBuilder {
        let create_key = self.table.clone();
        let insert_key = self.table.clone();
        let update_key = self.table.clone();
        let select_key = self.table.clone();

        builder
            .with_response(
                self.create_sql(),
                MockResponse::custom(move |_, scratch| {
                    if scratch.contains(&create_key) {
                        return MockResponse::error(format!(
                            "relation \"{create_key}\" already exists"
                        ));
                    }
                    scratch.set(create_key.clone(), Value::Null);
                    MockResponse::empty()
                }),
            )
            .with_response(
                self.insert_sql(),
                MockResponse::custom(move |_, scratch| {
                    with_table(scratch, &insert_key, |_| Some(0))
                }),
            )
            .with_response(
                self.increment_sql(),
                MockResponse::custom(move |_, scratch| {
                    with_table(scratch, &update_key, |current| current.map(|n| n + 1))
                }),
            )
            .with_response(
                self.select_sql(),
                MockResponse::custom(move |_, scratch| match scratch.get(&select_key) {
                    Some(Value::Int4(n)) => MockResponse::scalar_int(*n),
                    Some(_) => MockResponse::error("query returned no rows"),
                    None => missing_relation(&select_key),
                }),
            )
    }
}

/// Apply `update` to the table's single row and report the affected count.
fn with_table(
    scratch: &mut SessionScratch,
    table: &str,
    update: impl FnOnce(Option<i32>) -> Option<i32>,
) -> MockResponse {
    let current = match scratch.get(table) {
        None => return missing_relation(table),
        Some(Value::Int4(n)) => Some(*n),
        Some(_) => None,
    };
    match update(current) {
        Some(next) => {
            scratch.set(table, next);
            MockResponse::affected(1)
        }
        None => MockResponse::affected(0),
    }
}

fn missing_relation(table: &str) -> MockResponse {
    MockResponse::error(format!("relation \"{table}\" does not exist"))
}
