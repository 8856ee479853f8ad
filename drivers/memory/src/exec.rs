//! Evaluation of parsed commands against a catalog.

use std::sync::Arc;

use arrow::datatypes::{Field, Schema, SchemaRef};
use arrow::error::ArrowError;
use arrow::record_batch::{RecordBatch, RecordBatchReader};

use dbi_core::error::{Error, Result, Status};
use dbi_core::value::{values_to_array, Row, Value};
use dbi_core::Execution;

use crate::catalog::{Catalog, Undo};
use crate::sql::{Command, Expr, SelectItem};

/// Result set materialized at execution time, handed out in batches.
pub(crate) struct BatchReader {
    schema: SchemaRef,
    batches: std::vec::IntoIter<RecordBatch>,
}

impl Iterator for BatchReader {
    type Item = std::result::Result<RecordBatch, ArrowError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.batches.next().map(Ok)
    }
}

impl RecordBatchReader for BatchReader {
    fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }
}

/// One output column: where its values come from.
enum Source {
    Column(usize),
    Constant(Value),
}

fn param(params: &[Value], index: usize) -> Result<Value> {
    params.get(index).cloned().ok_or_else(|| {
        Error::with_message_and_status(
            &format!("Parameter {} is not bound", index + 1),
            Status::Bind,
        )
        .with_sqlstate("07001")
    })
}

fn constant(expr: &Expr, params: &[Value]) -> Result<Option<Value>> {
    match expr {
        Expr::Literal(value) => Ok(Some(value.clone())),
        Expr::Param { index, .. } => param(params, *index).map(Some),
        Expr::OutOfRange(text) => Err(Error::with_message_and_status(
            &format!("Numeric literal {} is out of range", text),
            Status::Execution,
        )
        .with_sqlstate("22003")),
        _ => Ok(None),
    }
}

fn no_such_column(name: &str) -> Error {
    Error::with_message_and_status(&format!("No such column: {}", name), Status::Execution)
        .with_sqlstate("42S22")
}

/// Runs `command`. A successful write appends how to revert it to `undo`.
pub(crate) fn execute(
    catalog: &mut Catalog,
    command: &Command,
    params: &[Value],
    batch_size: usize,
    undo: &mut Vec<Undo>,
) -> Result<Execution> {
    match command {
        Command::Select { items, from } => select(catalog, items, from.as_deref(), params, batch_size),
        Command::CreateTable { name, columns } => {
            undo.push(catalog.create_table(name, columns)?);
            Ok(Execution::rows(0))
        }
        Command::Insert { table, values } => {
            let values = values
                .iter()
                .map(|expr| match constant(expr, params)? {
                    Some(value) => Ok(value),
                    None => Err(Error::with_message_and_status(
                        "INSERT only accepts literals and placeholders",
                        Status::Execution,
                    )),
                })
                .collect::<Result<Vec<_>>>()?;
            undo.push(catalog.insert(table, values)?);
            Ok(Execution::rows(1))
        }
        Command::Delete { table } => {
            let (deleted, revert) = catalog.delete_all(table)?;
            undo.push(revert);
            Ok(Execution::rows(deleted as i64))
        }
    }
}

fn select(
    catalog: &Catalog,
    items: &[SelectItem],
    from: Option<&str>,
    params: &[Value],
    batch_size: usize,
) -> Result<Execution> {
    let table = from.map(|name| catalog.table(name)).transpose()?;

    let mut fields = Vec::new();
    let mut sources = Vec::new();
    for item in items {
        if let Some(value) = constant(&item.expr, params)? {
            let name = item.alias.clone().unwrap_or_else(|| match &item.expr {
                Expr::Param { index, .. } => format!("?{}", index + 1),
                _ => value.to_string(),
            });
            fields.push(Field::new(name, value.data_type(), true));
            sources.push(Source::Constant(value));
            continue;
        }
        match (&item.expr, table) {
            (Expr::Wildcard, Some(table)) => {
                for (index, (column, column_type)) in table.columns.iter().enumerate() {
                    fields.push(Field::new(column, column_type.data_type(), true));
                    sources.push(Source::Column(index));
                }
            }
            (Expr::Column(column), Some(table)) => {
                let index = table.column_index(column).ok_or_else(|| no_such_column(column))?;
                let name = item.alias.as_deref().unwrap_or(column);
                fields.push(Field::new(name, table.columns[index].1.data_type(), true));
                sources.push(Source::Column(index));
            }
            (Expr::Column(column), None) => return Err(no_such_column(column)),
            _ => {
                return Err(Error::with_message_and_status(
                    "SELECT * requires a FROM clause",
                    Status::Execution,
                )
                .with_sqlstate("42000"))
            }
        }
    }

    let rows: Vec<Row> = match table {
        Some(table) => table
            .rows
            .iter()
            .map(|record| project(&sources, &record.values))
            .collect(),
        None => vec![project(&sources, &[])],
    };

    let schema = Arc::new(Schema::new(fields));
    let batches = rows
        .chunks(batch_size.max(1))
        .map(|chunk| batch(&schema, chunk))
        .collect::<Result<Vec<_>>>()?;
    Ok(Execution::results(Box::new(BatchReader {
        schema,
        batches: batches.into_iter(),
    })))
}

fn project(sources: &[Source], row: &[Value]) -> Row {
    sources
        .iter()
        .map(|source| match source {
            Source::Column(index) => row.get(*index).cloned().unwrap_or(Value::Null),
            Source::Constant(value) => value.clone(),
        })
        .collect()
}

fn batch(schema: &SchemaRef, rows: &[Row]) -> Result<RecordBatch> {
    let columns = schema
        .fields()
        .iter()
        .enumerate()
        .map(|(index, field)| {
            let values: Vec<Value> = rows.iter().map(|row| row[index].clone()).collect();
            values_to_array(field.data_type(), &values)
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(RecordBatch::try_new(schema.clone(), columns)?)
}
