//! Demo models served by the bundled routes

use serde::{Deserialize, Serialize};
use sqlbind_core::{Column, ColumnType, Metadata, Model, Table};

/// A user row: `{"id": 1, "nickname": "fantix"}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub nickname: String,
}

impl Model for User {
    const TABLE: &'static str = "app_users";

    fn table() -> Table {
        Table::new(Self::TABLE)
            .column(Column::new("id", ColumnType::BigSerial).primary_key())
            .column(Column::new("nickname", ColumnType::Text).not_null().default("noname"))
    }
}

/// Registry of every table the demo app uses
pub fn metadata() -> Metadata {
    Metadata::new().register::<User>()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_serializes_flat() {
        let user = User {
            id: 1,
            nickname: "fantix".into(),
        };
        assert_eq!(
            serde_json::to_value(&user).unwrap(),
            serde_json::json!({ "id": 1, "nickname": "fantix" })
        );
    }

    #[test]
    fn metadata_has_users_table() {
        let metadata = metadata();
        assert_eq!(metadata.tables().len(), 1);
        assert!(metadata.tables()[0]
            .create_sql()
            .contains(r#""nickname" TEXT NOT NULL DEFAULT 'noname'"#));
    }
}
