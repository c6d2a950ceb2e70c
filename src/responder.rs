//! Query handler interface (spec.md §6) and the built-in fallback
//! responder that exercises it (spec.md §4.5) when no external executor
//! is installed.

use futures::future::BoxFuture;

use crate::error::SessionError;
use crate::protocol::builder::ColumnSpec;
use crate::protocol::builder::column_type;

/// What a query resolved to: either a plain acknowledgement or a text
/// result set the session can emit column-by-column, row-by-row.
#[derive(Debug, Clone)]
pub enum QueryOutcome {
    Ok {
        affected_rows: u64,
        last_insert_id: u64,
        info: String,
    },
    ResultSet {
        columns: Vec<ColumnSpec>,
        rows: Vec<Vec<Option<Vec<u8>>>>,
    },
}

impl QueryOutcome {
    pub fn ok(affected_rows: u64) -> Self {
        Self::Ok {
            affected_rows,
            last_insert_id: 0,
            info: String::new(),
        }
    }
}

/// A capability object a caller installs on a session to execute real
/// queries. [`FallbackResponder`] is the only implementation this crate
/// ships; a real executor is an external collaborator (spec.md §6).
pub trait QueryHandler: Send + Sync {
    fn handle_query<'a>(
        &'a self,
        query: &'a str,
        current_database: &'a str,
    ) -> BoxFuture<'a, Result<QueryOutcome, SessionError>>;
}

/// Synthesizes mock result sets for a small set of statement shapes, the
/// contract the protocol engine exercises when no real executor is wired
/// in. Keyword matching is case-insensitive on the trimmed leading word(s).
pub struct FallbackResponder {
    pub server_version: String,
    pub max_connections: u32,
}

impl QueryHandler for FallbackResponder {
    fn handle_query<'a>(
        &'a self,
        query: &'a str,
        current_database: &'a str,
    ) -> BoxFuture<'a, Result<QueryOutcome, SessionError>> {
        Box::pin(async move { Ok(self.dispatch(query, current_database)) })
    }
}

impl FallbackResponder {
    fn dispatch(&self, query: &str, current_database: &str) -> QueryOutcome {
        let trimmed = query.trim();
        let upper = trimmed.to_uppercase();

        if upper.starts_with("SELECT") {
            self.select_result(query)
        } else if upper.starts_with("INSERT") || upper.starts_with("UPDATE") || upper.starts_with("DELETE") {
            QueryOutcome::ok(1)
        } else if upper.starts_with("SHOW") {
            self.show_result(&upper, current_database)
        } else {
            QueryOutcome::ok(0)
        }
    }

    fn select_result(&self, query: &str) -> QueryOutcome {
        let echoed: String = query.chars().take(50).collect();
        let message = format!("Hello from HchDB! Query: {echoed}...");
        QueryOutcome::ResultSet {
            columns: vec![ColumnSpec::new("message", column_type::VAR_STRING)],
            rows: vec![vec![Some(message.into_bytes())]],
        }
    }

    fn show_result(&self, upper: &str, current_database: &str) -> QueryOutcome {
        if upper.contains("DATABASES") {
            let rows = ["information_schema", "hchdb", "test"]
                .iter()
                .map(|db| vec![Some(db.as_bytes().to_vec())])
                .collect();
            QueryOutcome::ResultSet {
                columns: vec![ColumnSpec::new("SCHEMA_NAME", column_type::VAR_STRING)],
                rows,
            }
        } else if upper.contains("TABLES") {
            let db = if current_database.is_empty() {
                "hchdb"
            } else {
                current_database
            };
            let rows = ["users", "orders", "products"]
                .iter()
                .map(|t| vec![Some(t.as_bytes().to_vec())])
                .collect();
            QueryOutcome::ResultSet {
                columns: vec![ColumnSpec::new(format!("Tables_in_{db}"), column_type::VAR_STRING)],
                rows,
            }
        } else if upper.contains("VARIABLES") || upper.contains("VERSION") {
            let rows = vec![
                vec![
                    Some(b"version".to_vec()),
                    Some(self.server_version.clone().into_bytes()),
                ],
                vec![
                    Some(b"version_comment".to_vec()),
                    Some(b"HchDB distributed database".to_vec()),
                ],
                vec![
                    Some(b"max_connections".to_vec()),
                    Some(self.max_connections.to_string().into_bytes()),
                ],
            ];
            QueryOutcome::ResultSet {
                columns: vec![
                    ColumnSpec::new("Variable_name", column_type::VAR_STRING),
                    ColumnSpec::new("Value", column_type::VAR_STRING),
                ],
                rows,
            }
        } else {
            QueryOutcome::ok(0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn responder() -> FallbackResponder {
        FallbackResponder {
            server_version: "8.0.0-hchdb".to_string(),
            max_connections: 1000,
        }
    }

    #[tokio::test]
    async fn select_echoes_truncated_query() {
        let outcome = responder()
            .handle_query("SELECT 'Hello HchDB' as message", "hchdb")
            .await
            .unwrap();
        match outcome {
            QueryOutcome::ResultSet { columns, rows } => {
                assert_eq!(columns.len(), 1);
                assert_eq!(columns[0].name, "message");
                assert_eq!(rows.len(), 1);
            }
            _ => panic!("expected a result set"),
        }
    }

    #[tokio::test]
    async fn insert_returns_one_affected_row() {
        let outcome = responder()
            .handle_query("INSERT INTO users VALUES (1)", "hchdb")
            .await
            .unwrap();
        match outcome {
            QueryOutcome::Ok { affected_rows, .. } => assert_eq!(affected_rows, 1),
            _ => panic!("expected an OK outcome"),
        }
    }

    #[tokio::test]
    async fn show_databases_lists_the_three_fixed_schemas() {
        let outcome = responder()
            .handle_query("SHOW DATABASES", "hchdb")
            .await
            .unwrap();
        match outcome {
            QueryOutcome::ResultSet { columns, rows } => {
                assert_eq!(columns[0].name, "SCHEMA_NAME");
                assert_eq!(rows.len(), 3);
            }
            _ => panic!("expected a result set"),
        }
    }

    #[tokio::test]
    async fn show_tables_names_column_after_current_database() {
        let outcome = responder()
            .handle_query("SHOW TABLES", "analytics")
            .await
            .unwrap();
        match outcome {
            QueryOutcome::ResultSet { columns, rows } => {
                assert_eq!(columns[0].name, "Tables_in_analytics");
                assert_eq!(rows.len(), 3);
            }
            _ => panic!("expected a result set"),
        }
    }

    #[tokio::test]
    async fn show_variables_reports_server_version_and_max_connections() {
        let outcome = responder()
            .handle_query("SHOW VARIABLES LIKE 'version'", "hchdb")
            .await
            .unwrap();
        match outcome {
            QueryOutcome::ResultSet { columns, rows } => {
                assert_eq!(columns.len(), 2);
                assert_eq!(rows.len(), 3);
                assert_eq!(rows[0][1].as_ref().unwrap(), b"8.0.0-hchdb");
            }
            _ => panic!("expected a result set"),
        }
    }

    #[tokio::test]
    async fn anything_else_returns_a_zero_row_ok() {
        let outcome = responder().handle_query("BEGIN", "hchdb").await.unwrap();
        match outcome {
            QueryOutcome::Ok { affected_rows, .. } => assert_eq!(affected_rows, 0),
            _ => panic!("expected an OK outcome"),
        }
    }
}
