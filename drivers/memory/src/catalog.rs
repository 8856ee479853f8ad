use std::collections::HashMap;

use arrow::datatypes::DataType;

use dbi_core::error::{Error, Result, Status};
use dbi_core::value::{Row, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ColumnType {
    Integer,
    Real,
    Text,
    Blob,
    Boolean,
}

impl ColumnType {
    pub(crate) fn data_type(&self) -> DataType {
        match self {
            ColumnType::Integer => DataType::Int64,
            ColumnType::Real => DataType::Float64,
            ColumnType::Text => DataType::Utf8,
            ColumnType::Blob => DataType::Binary,
            ColumnType::Boolean => DataType::Boolean,
        }
    }
}

/// A stored row. Ids grow with every insert on the catalog.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Record {
    pub(crate) id: u64,
    pub(crate) values: Row,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct Table {
    pub(crate) columns: Vec<(String, ColumnType)>,
    pub(crate) rows: Vec<Record>,
}

impl Table {
    pub(crate) fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|(column, _)| column == name)
    }
}

/// Reverts one successful write.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Undo {
    CreateTable(String),
    Insert { table: String, id: u64 },
    Delete { table: String, records: Vec<Record> },
}

/// Tables of one target, shared by all its connections.
#[derive(Debug, Default)]
pub(crate) struct Catalog {
    tables: HashMap<String, Table>,
    next_id: u64,
}

fn no_such_table(name: &str) -> Error {
    Error::with_message_and_status(&format!("No such table: {}", name), Status::Execution)
        .with_sqlstate("42S02")
}

impl Catalog {
    pub(crate) fn create_table(&mut self, name: &str, columns: &[(String, ColumnType)]) -> Result<Undo> {
        if self.tables.contains_key(name) {
            return Err(Error::with_message_and_status(
                &format!("Table {} already exists", name),
                Status::Execution,
            )
            .with_sqlstate("42S01"));
        }
        for (index, (column, _)) in columns.iter().enumerate() {
            if columns[..index].iter().any(|(other, _)| other == column) {
                return Err(Error::with_message_and_status(
                    &format!("Duplicate column {} in table {}", column, name),
                    Status::Execution,
                )
                .with_sqlstate("42S21"));
            }
        }
        self.tables.insert(
            name.into(),
            Table {
                columns: columns.to_vec(),
                rows: Vec::new(),
            },
        );
        Ok(Undo::CreateTable(name.into()))
    }

    pub(crate) fn table(&self, name: &str) -> Result<&Table> {
        self.tables.get(name).ok_or_else(|| no_such_table(name))
    }

    /// Appends a row after coercing every value to its column type.
    pub(crate) fn insert(&mut self, name: &str, values: Vec<Value>) -> Result<Undo> {
        let table = self.tables.get_mut(name).ok_or_else(|| no_such_table(name))?;
        if values.len() != table.columns.len() {
            return Err(Error::with_message_and_status(
                &format!(
                    "Table {} has {} columns but {} values were supplied",
                    name,
                    table.columns.len(),
                    values.len()
                ),
                Status::Execution,
            )
            .with_sqlstate("21S01"));
        }
        let values = values
            .into_iter()
            .zip(&table.columns)
            .map(|(value, (column, column_type))| {
                value.coerce(&column_type.data_type()).ok_or_else(|| {
                    Error::with_message_and_status(
                        &format!("Value {} does not fit column {} {:?}", value, column, column_type),
                        Status::Execution,
                    )
                    .with_sqlstate("22018")
                })
            })
            .collect::<Result<Row>>()?;
        let id = self.next_id;
        self.next_id += 1;
        table.rows.push(Record { id, values });
        Ok(Undo::Insert {
            table: name.into(),
            id,
        })
    }

    /// Removes every row, returning how many there were.
    pub(crate) fn delete_all(&mut self, name: &str) -> Result<(usize, Undo)> {
        let table = self.tables.get_mut(name).ok_or_else(|| no_such_table(name))?;
        let records = std::mem::take(&mut table.rows);
        Ok((
            records.len(),
            Undo::Delete {
                table: name.into(),
                records,
            },
        ))
    }

    /// Applies `undo`. Rows and tables other connections removed meanwhile
    /// are skipped.
    pub(crate) fn revert(&mut self, undo: Undo) {
        match undo {
            Undo::CreateTable(name) => {
                self.tables.remove(&name);
            }
            Undo::Insert { table, id } => {
                if let Some(table) = self.tables.get_mut(&table) {
                    table.rows.retain(|record| record.id != id);
                }
            }
            Undo::Delete { table, records } => {
                if let Some(table) = self.tables.get_mut(&table) {
                    table.rows.extend(records);
                    table.rows.sort_by_key(|record| record.id);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn people() -> Catalog {
        let mut catalog = Catalog::default();
        catalog
            .create_table(
                "people",
                &[
                    ("id".into(), ColumnType::Integer),
                    ("name".into(), ColumnType::Text),
                ],
            )
            .unwrap();
        catalog
    }

    fn ids(catalog: &Catalog) -> Vec<u64> {
        let table = catalog.table("people").unwrap();
        table.rows.iter().map(|record| record.id).collect()
    }

    #[test]
    fn test_create_table_twice() {
        let mut catalog = people();
        let err = catalog.create_table("people", &[]).unwrap_err();
        assert_eq!(err.sqlstate(), "42S01");

        let err = catalog
            .create_table(
                "pets",
                &[
                    ("id".into(), ColumnType::Integer),
                    ("id".into(), ColumnType::Text),
                ],
            )
            .unwrap_err();
        assert_eq!(err.sqlstate(), "42S21");
    }

    #[test]
    fn test_insert_coerces_values() {
        let mut catalog = people();
        catalog
            .insert("people", vec![Value::Int(1), Value::Text("ann".into())])
            .unwrap();
        catalog.insert("people", vec![Value::Null, Value::Null]).unwrap();
        assert_eq!(ids(&catalog), vec![0, 1]);

        let err = catalog
            .insert("people", vec![Value::Text("x".into()), Value::Null])
            .unwrap_err();
        assert_eq!(err.sqlstate(), "22018");

        let err = catalog.insert("people", vec![Value::Int(1)]).unwrap_err();
        assert_eq!(err.sqlstate(), "21S01");

        let err = catalog.insert("pets", vec![]).unwrap_err();
        assert_eq!(err.sqlstate(), "42S02");
        assert_eq!(ids(&catalog), vec![0, 1]);
    }

    #[test]
    fn test_delete_all() {
        let mut catalog = people();
        catalog.insert("people", vec![Value::Int(1), Value::Null]).unwrap();
        assert_eq!(catalog.delete_all("people").unwrap().0, 1);
        assert_eq!(catalog.delete_all("people").unwrap().0, 0);
    }

    #[test]
    fn test_revert_touches_only_its_own_rows() {
        let mut catalog = people();
        let mine = catalog.insert("people", vec![Value::Int(1), Value::Null]).unwrap();
        catalog.insert("people", vec![Value::Int(2), Value::Null]).unwrap();
        catalog.revert(mine);
        assert_eq!(ids(&catalog), vec![1]);

        let (_, delete) = catalog.delete_all("people").unwrap();
        catalog.insert("people", vec![Value::Int(3), Value::Null]).unwrap();
        catalog.revert(delete);
        assert_eq!(ids(&catalog), vec![1, 2]);

        let create = catalog.create_table("pets", &[]).unwrap();
        catalog.revert(create);
        assert!(catalog.table("pets").is_err());
        // Tables removed meanwhile are skipped.
        catalog.revert(Undo::Insert {
            table: "pets".into(),
            id: 0,
        });
    }
}
