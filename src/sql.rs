use sqlparser::ast::{
    self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value,
    ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    /// `SELECT * FROM slots WHERE date = '...'`: public view, generates on miss.
    SelectSlots { date: ScheduleDate },
    /// `SELECT * FROM schedule WHERE date = '...'`: admin detail.
    SelectSchedule { date: ScheduleDate },
    /// `SELECT * FROM schedules`: one summary row per live record.
    SelectSchedules,
    /// `SELECT * FROM template`: weekday to time labels.
    SelectTemplate,
    /// `INSERT INTO bookings (date, time, patient_name, patient_mobile
    /// [, patient_email [, reason]]) VALUES (...)`
    InsertBooking {
        date: ScheduleDate,
        time: String,
        patient: Patient,
    },
    /// Multi-row `INSERT INTO template (provider_id, day, times) VALUES ...`
    /// replaces the whole weekly template; `times` is comma-separated.
    ReplaceTemplate { provider_id: Ulid, week: WeekPlan },
    /// `UPDATE bookings SET status = '...' WHERE date = '...' AND time = '...'`
    UpdateSlotStatus {
        date: ScheduleDate,
        time: String,
        status: SlotStatus,
    },
    /// `DELETE FROM schedules WHERE date >= '...'`: future-unbooked sweep.
    DeleteFutureUnbooked { on_or_after: ScheduleDate },
    Listen { channel: String },
    Unlisten { channel: String },
    UnlistenAll,
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let trimmed = sql.trim().trim_end_matches(';').trim();
    let upper = trimmed.to_uppercase();
    if upper.starts_with("LISTEN ") {
        let channel = trimmed[7..].trim().to_string();
        return Ok(Command::Listen { channel });
    }
    if upper == "UNLISTEN *" {
        return Ok(Command::UnlistenAll);
    }
    if upper.starts_with("UNLISTEN ") {
        let channel = trimmed[9..].trim().to_string();
        return Ok(Command::Unlisten { channel });
    }

    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }

    match &stmts[0] {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(table, assignments, selection),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;

    match table.as_str() {
        "bookings" => {
            let rows = extract_all_insert_rows(insert)?;
            if rows.len() > 1 {
                return Err(SqlError::Unsupported("multi-row bookings INSERT".into()));
            }
            let values = &rows[0];
            if values.len() < 4 {
                return Err(SqlError::WrongArity("bookings", 4, values.len()));
            }
            let date = parse_date(&values[0])?;
            let time = parse_string(&values[1])?;
            let patient = Patient {
                name: parse_string(&values[2])?,
                mobile: parse_string(&values[3])?,
                email: if values.len() >= 5 {
                    parse_string_or_null(&values[4])?
                } else {
                    None
                },
                reason: if values.len() >= 6 {
                    parse_string_or_null(&values[5])?
                } else {
                    None
                },
            };
            Ok(Command::InsertBooking {
                date,
                time,
                patient,
            })
        }
        "template" => {
            let rows = extract_all_insert_rows(insert)?;
            let mut provider_id = None;
            let mut week = WeekPlan::new();
            for (i, row) in rows.iter().enumerate() {
                if row.len() < 3 {
                    return Err(SqlError::WrongArity("template row", 3, row.len()));
                }
                let pid =
                    parse_ulid(&row[0]).map_err(|e| SqlError::Parse(format!("row {i}: {e}")))?;
                match provider_id {
                    None => provider_id = Some(pid),
                    Some(existing) if existing != pid => {
                        return Err(SqlError::Parse(
                            "template rows must share one provider_id".into(),
                        ));
                    }
                    Some(_) => {}
                }
                let day = parse_string(&row[1])
                    .map_err(|e| SqlError::Parse(format!("row {i}: {e}")))?;
                let day = parse_day_name(&day)
                    .ok_or_else(|| SqlError::Parse(format!("row {i}: unknown weekday: {day}")))?;
                let times = parse_string(&row[2])
                    .map_err(|e| SqlError::Parse(format!("row {i}: {e}")))?;
                let times: Vec<String> = times
                    .split(',')
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .map(String::from)
                    .collect();
                week.set(day, times);
            }
            Ok(Command::ReplaceTemplate {
                provider_id: provider_id.ok_or(SqlError::Empty)?,
                week,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    if table != "schedules" {
        return Err(SqlError::UnknownTable(table));
    }

    let sel = delete
        .selection
        .as_ref()
        .ok_or(SqlError::MissingFilter("date"))?;
    match sel {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::GtEq,
            right,
        } if expr_column_name(left).as_deref() == Some("date") => Ok(Command::DeleteFutureUnbooked {
            on_or_after: parse_date(right)?,
        }),
        _ => Err(SqlError::MissingFilter("date")),
    }
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;

    match table.as_str() {
        "slots" => Ok(Command::SelectSlots {
            date: extract_where_date(&select.selection)?,
        }),
        "schedule" => Ok(Command::SelectSchedule {
            date: extract_where_date(&select.selection)?,
        }),
        "schedules" => Ok(Command::SelectSchedules),
        "template" => Ok(Command::SelectTemplate),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_update(
    table: &ast::TableWithJoins,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(&table.relation)?;
    if table != "bookings" {
        return Err(SqlError::UnknownTable(table));
    }

    let mut status = None;
    for assignment in assignments {
        match assignment_column(&assignment.target).as_deref() {
            Some("status") => {
                let raw = parse_string(&assignment.value)?;
                status = Some(
                    SlotStatus::parse(&raw)
                        .ok_or_else(|| SqlError::Parse(format!("unknown status: {raw}")))?,
                );
            }
            Some(other) => {
                return Err(SqlError::Unsupported(format!("UPDATE of column {other}")));
            }
            None => return Err(SqlError::Parse("bad assignment target".into())),
        }
    }
    let status = status.ok_or(SqlError::MissingFilter("status"))?;

    let (mut date, mut time) = (None, None);
    if let Some(sel) = selection {
        extract_booking_filters(sel, &mut date, &mut time)?;
    }

    Ok(Command::UpdateSlotStatus {
        date: date.ok_or(SqlError::MissingFilter("date"))?,
        time: time.ok_or(SqlError::MissingFilter("time"))?,
        status,
    })
}

fn extract_booking_filters(
    expr: &Expr,
    date: &mut Option<ScheduleDate>,
    time: &mut Option<String>,
) -> Result<(), SqlError> {
    if let Expr::BinaryOp { left, op, right } = expr {
        match op {
            ast::BinaryOperator::And => {
                extract_booking_filters(left, date, time)?;
                extract_booking_filters(right, date, time)?;
            }
            ast::BinaryOperator::Eq => match expr_column_name(left).as_deref() {
                Some("date") => *date = Some(parse_date(right)?),
                Some("time") => *time = Some(parse_string(right)?),
                _ => {}
            },
            _ => {}
        }
    }
    Ok(())
}

// ── Helpers ───────────────────────────────────────────────────

fn object_name_last(name: &ast::ObjectName) -> Option<String> {
    name.0.last().and_then(|part| match part {
        ObjectNamePart::Identifier(ident) => Some(ident.value.to_lowercase()),
        _ => None,
    })
}

fn insert_table_name(insert: &ast::Insert) -> Result<String, SqlError> {
    match &insert.table {
        TableObject::TableName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("unsupported table object in INSERT".into())),
    }
}

fn delete_table_name(delete: &ast::Delete) -> Result<String, SqlError> {
    let tables_with_joins = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    if let Some(first) = tables_with_joins.first() {
        table_factor_name(&first.relation)
    } else {
        Err(SqlError::Parse("DELETE without table".into()))
    }
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn assignment_column(target: &ast::AssignmentTarget) -> Option<String> {
    match target {
        ast::AssignmentTarget::ColumnName(name) => object_name_last(name),
        ast::AssignmentTarget::Tuple(_) => None,
    }
}

fn extract_all_insert_rows(insert: &ast::Insert) -> Result<Vec<Vec<Expr>>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => {
            if values.rows.is_empty() {
                return Err(SqlError::Parse("empty VALUES".into()));
            }
            Ok(values.rows.clone())
        }
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn extract_where_date(selection: &Option<Expr>) -> Result<ScheduleDate, SqlError> {
    let sel = selection.as_ref().ok_or(SqlError::MissingFilter("date"))?;
    match sel {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } if expr_column_name(left).as_deref() == Some("date") => parse_date(right),
        _ => Err(SqlError::MissingFilter("date")),
    }
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

fn extract_value(expr: &Expr) -> Option<&Value> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        _ => None,
    }
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::SingleQuotedString(s) => Ok(s.clone()),
            Value::Number(s, _) => Ok(s.clone()),
            _ => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    if let Some(Value::Null) = extract_value(expr) {
        return Ok(None);
    }
    let s = parse_string(expr)?;
    Ok(if s.is_empty() { None } else { Some(s) })
}

fn parse_date(expr: &Expr) -> Result<ScheduleDate, SqlError> {
    let s = parse_string(expr)?;
    ScheduleDate::parse(&s)
        .ok_or_else(|| SqlError::Parse(format!("bad date (expected YYYY-MM-DD): {s}")))
}

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    let s = parse_string(expr)?;
    Ulid::from_string(&s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    WrongArity(&'static str, usize, usize),
    MissingFilter(&'static str),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}
