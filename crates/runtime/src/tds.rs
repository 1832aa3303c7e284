//! Tabular data set streaming.
//!
//! Rows are serialized append-only against a schema fixed before the first
//! row; nothing is buffered to compute envelopes. If the producer fails
//! mid-stream the output is left syntactically incomplete (unterminated
//! array), so downstream readers can detect truncation by failing to parse
//! it as a complete document. The writer therefore never auto-closes on
//! drop; only an explicit [`TdsWriter::finish`] terminates the stream.

use std::io::Write;

use meridian_common::value::Value;
use meridian_error::{ErrorCode, ErrorContext, MeridianError, Result};
use meridian_plan::{TdsColumn, TdsType};

/// Envelope variant wrapped around the shared row stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TdsFraming {
    /// Bare `{ columns, rows, activities }` document.
    Pure,
    /// Adds the builder envelope carrying the typed column declarations.
    Default,
}

pub struct TdsWriter<W: Write> {
    out: W,
    framing: TdsFraming,
    schema: Option<Vec<TdsColumn>>,
    rows_written: usize,
}

impl<W: Write> TdsWriter<W> {
    pub fn new(out: W, framing: TdsFraming) -> Self {
        Self {
            out,
            framing,
            schema: None,
            rows_written: 0,
        }
    }

    /// Fix the ordered column list and emit the envelope opening.
    pub fn attach_schema(&mut self, columns: Vec<TdsColumn>) -> Result<()> {
        if self.schema.is_some() {
            return Err(MeridianError::new(
                ErrorCode::Internal,
                "Result schema is already attached",
            ));
        }

        let names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
        match self.framing {
            TdsFraming::Pure => {
                self.out.write_all(b"{\"columns\":")?;
                serde_json::to_writer(&mut self.out, &names)?;
            }
            TdsFraming::Default => {
                self.out
                    .write_all(b"{\"builder\":{\"_type\":\"tdsBuilder\",\"columns\":")?;
                serde_json::to_writer(&mut self.out, &columns)?;
                self.out.write_all(b"},\"result\":{\"columns\":")?;
                serde_json::to_writer(&mut self.out, &names)?;
            }
        }
        self.out.write_all(b",\"rows\":[")?;

        self.schema = Some(columns);
        Ok(())
    }

    /// Append one row. Length and positional types must match the schema.
    pub fn write_row(&mut self, values: &[Value]) -> Result<()> {
        let schema = self.schema.as_ref().ok_or_else(|| {
            MeridianError::new(ErrorCode::Internal, "Row written before schema was attached")
        })?;

        if values.len() != schema.len() {
            return Err(MeridianError::new(
                ErrorCode::SchemaMismatch,
                format!(
                    "Row has {} values but the schema declares {} columns",
                    values.len(),
                    schema.len()
                ),
            )
            .with_context(ErrorContext::Schema {
                expected_columns: schema.len(),
                actual_values: values.len(),
                column: None,
            }));
        }
        for (column, value) in schema.iter().zip(values) {
            check_type(column, value, schema.len(), values.len())?;
        }

        if self.rows_written > 0 {
            self.out.write_all(b",")?;
        }
        self.out.write_all(b"{\"values\":")?;
        serde_json::to_writer(&mut self.out, values)?;
        self.out.write_all(b"}")?;
        self.rows_written += 1;
        Ok(())
    }

    pub fn rows_written(&self) -> usize {
        self.rows_written
    }

    /// Terminate the stream and hand back the underlying writer.
    pub fn finish(mut self, activities: &[Activity]) -> Result<W> {
        if self.schema.is_none() {
            return Err(MeridianError::new(
                ErrorCode::Internal,
                "Stream finished before schema was attached",
            ));
        }

        self.out.write_all(b"]")?;
        if self.framing == TdsFraming::Default {
            self.out.write_all(b"}")?;
        }
        self.out.write_all(b",\"activities\":")?;
        serde_json::to_writer(&mut self.out, activities)?;
        self.out.write_all(b"}")?;
        self.out.flush()?;
        Ok(self.out)
    }
}

/// One activity record in the result envelope: a statement the execution
/// ran against a store, for caller-side diagnostics.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Activity {
    pub sql: String,
    pub pool: String,
}

fn check_type(
    column: &TdsColumn,
    value: &Value,
    expected_columns: usize,
    actual_values: usize,
) -> Result<()> {
    let ok = match (column.tds_type, value) {
        (_, Value::Null) => true,
        (TdsType::String, Value::String(_)) => true,
        (TdsType::Integer, Value::Integer(_)) => true,
        (TdsType::Float, Value::Float(_) | Value::Integer(_)) => true,
        (TdsType::Boolean, Value::Boolean(_)) => true,
        (TdsType::Date, Value::String(_)) => true,
        _ => false,
    };
    if ok {
        return Ok(());
    }
    Err(MeridianError::new(
        ErrorCode::SchemaMismatch,
        format!(
            "Column '{}' declares {:?} but the row carries {:?}",
            column.name, column.tds_type, value
        ),
    )
    .with_context(ErrorContext::Schema {
        expected_columns,
        actual_values,
        column: Some(column.name.clone()),
    }))
}
