//! Shared fixtures for the crate's unit tests.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::sync::Arc;

use relq_core::RelqResult;

use crate::executor::{DbExecutor, Row};
use crate::fields::{FieldDef, FieldType};
use crate::model::{ModelMeta, ModelRegistry};
use crate::query::compiler::{DatabaseBackendType, SqlCompiler};
use crate::value::Value;

/// The schema used across the query tests.
pub fn registry() -> Arc<ModelRegistry> {
    let models = vec![
        ModelMeta::new("queries", "Tag")
            .field(FieldDef::auto("id"))
            .field(FieldDef::new("name", FieldType::CharField).max_length(10))
            .field(
                FieldDef::foreign_key("parent", "self")
                    .nullable()
                    .related_name("children"),
            )
            .ordering(["name"]),
        ModelMeta::new("queries", "Note")
            .field(FieldDef::auto("id"))
            .field(FieldDef::new("note", FieldType::CharField).max_length(100))
            .field(FieldDef::new("misc", FieldType::CharField).max_length(10))
            .ordering(["note"]),
        ModelMeta::new("queries", "ExtraInfo")
            .field(FieldDef::auto("id"))
            .field(FieldDef::new("info", FieldType::CharField).max_length(100))
            .field(FieldDef::foreign_key("note", "Note")),
        ModelMeta::new("queries", "Author")
            .field(FieldDef::auto("id"))
            .field(FieldDef::new("name", FieldType::CharField).max_length(10))
            .field(FieldDef::new("num", FieldType::IntegerField).unique())
            .field(FieldDef::foreign_key("extra", "ExtraInfo"))
            .ordering(["name"]),
        ModelMeta::new("queries", "Item")
            .field(FieldDef::auto("id"))
            .field(FieldDef::new("name", FieldType::CharField).max_length(10))
            .field(FieldDef::new("created", FieldType::DateTimeField))
            .field(FieldDef::many_to_many("tags", "Tag"))
            .field(FieldDef::foreign_key("creator", "Author"))
            .field(FieldDef::foreign_key("note", "Note"))
            .ordering(["-note", "name"]),
        ModelMeta::new("queries", "Report")
            .field(FieldDef::auto("id"))
            .field(FieldDef::new("name", FieldType::CharField).max_length(10))
            .field(
                FieldDef::foreign_key("creator", "Author")
                    .to_field("num")
                    .nullable(),
            ),
        ModelMeta::new("queries", "Ranking")
            .field(FieldDef::auto("id"))
            .field(FieldDef::new("rank", FieldType::IntegerField))
            .field(FieldDef::foreign_key("author", "Author"))
            .ordering(["-rank"]),
        ModelMeta::new("queries", "Cover")
            .field(FieldDef::auto("id"))
            .field(FieldDef::new("title", FieldType::CharField).max_length(50))
            .field(FieldDef::foreign_key("item", "Item"))
            .ordering(["item"]),
        ModelMeta::new("queries", "LoopX")
            .field(FieldDef::auto("id"))
            .field(FieldDef::foreign_key("y", "LoopY"))
            .ordering(["y"]),
        ModelMeta::new("queries", "LoopY")
            .field(FieldDef::auto("id"))
            .field(FieldDef::foreign_key("x", "LoopX"))
            .ordering(["x"]),
        ModelMeta::new("queries", "LoopZ")
            .field(FieldDef::auto("id"))
            .field(FieldDef::foreign_key("z", "self"))
            .ordering(["z"]),
        ModelMeta::new("many_to_one", "Reporter")
            .field(FieldDef::auto("id"))
            .field(FieldDef::new("first_name", FieldType::CharField).max_length(30))
            .field(FieldDef::new("last_name", FieldType::CharField).max_length(30))
            .field(FieldDef::new("email", FieldType::CharField)),
        ModelMeta::new("many_to_one", "Article")
            .field(FieldDef::auto("id"))
            .field(FieldDef::new("headline", FieldType::CharField).max_length(100))
            .field(FieldDef::new("pub_date", FieldType::DateField))
            .field(FieldDef::foreign_key("reporter", "Reporter"))
            .ordering(["headline"]),
        ModelMeta::new("inherit", "Place")
            .field(FieldDef::auto("id"))
            .field(FieldDef::new("name", FieldType::CharField).max_length(50))
            .field(FieldDef::new("address", FieldType::CharField).max_length(80)),
        ModelMeta::new("inherit", "Restaurant")
            .field(FieldDef::parent_link("place_ptr", "Place"))
            .field(FieldDef::new("serves_pizza", FieldType::BooleanField)),
    ];
    let mut registry = ModelRegistry::new();
    for meta in models {
        registry.register(meta).unwrap();
    }
    registry.into_shared().unwrap()
}

pub fn sqlite() -> SqlCompiler {
    SqlCompiler::new(DatabaseBackendType::SQLite)
}

/// Records every statement and answers queries from a queue of canned row
/// sets. Rows get positional column names `c0`, `c1`, ...
#[derive(Default)]
pub struct RecordingExecutor {
    backend: Option<DatabaseBackendType>,
    statements: RefCell<Vec<(String, Vec<Value>)>>,
    results: RefCell<VecDeque<Vec<Row>>>,
    next_id: Cell<i64>,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// An executor that reports `backend` instead of SQLite.
    pub fn with_backend(backend: DatabaseBackendType) -> Self {
        Self {
            backend: Some(backend),
            ..Self::default()
        }
    }

    /// Queues the result of the next `query` call.
    pub fn push_rows(&self, rows: Vec<Vec<Value>>) {
        let rows = rows
            .into_iter()
            .map(|values| {
                let columns = (0..values.len()).map(|i| format!("c{i}")).collect();
                Row::new(columns, values)
            })
            .collect();
        self.results.borrow_mut().push_back(rows);
    }

    pub fn statements(&self) -> Vec<(String, Vec<Value>)> {
        self.statements.borrow().clone()
    }

    fn record(&self, sql: &str, params: &[Value]) {
        self.statements
            .borrow_mut()
            .push((sql.to_string(), params.to_vec()));
    }
}

impl DbExecutor for RecordingExecutor {
    fn backend_type(&self) -> DatabaseBackendType {
        self.backend.unwrap_or(DatabaseBackendType::SQLite)
    }

    fn execute_sql(&self, sql: &str, params: &[Value]) -> RelqResult<u64> {
        self.record(sql, params);
        Ok(1)
    }

    fn query(&self, sql: &str, params: &[Value]) -> RelqResult<Vec<Row>> {
        self.record(sql, params);
        Ok(self.results.borrow_mut().pop_front().unwrap_or_default())
    }

    fn insert_returning_id(&self, sql: &str, params: &[Value]) -> RelqResult<Value> {
        self.record(sql, params);
        let id = self.next_id.get() + 1;
        self.next_id.set(id);
        Ok(Value::Int(id))
    }
}
