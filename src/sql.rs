use chrono::{DateTime, NaiveDate};
use serde::de::DeserializeOwned;
use sqlparser::ast::{
    self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value,
    ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use thiserror::Error;
use ulid::Ulid;

use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    UpsertBranch {
        branch: Branch,
    },
    InsertCalendarEntry {
        entry: CalendarEntry,
    },
    DeleteCalendarEntry {
        id: Ulid,
    },
    InsertAppointment {
        appointment: NewAppointment,
    },
    Reschedule {
        id: Ulid,
        appointment_date: Ms,
        duration: Option<u32>,
    },
    ChangeStatus {
        id: Ulid,
        status: AppointmentStatus,
    },
    CancelAppointment {
        id: Ulid,
    },
    SelectAvailability {
        branch_id: String,
        date: NaiveDate,
        duration: i64,
        stylist_ids: Vec<String>,
    },
    SelectAppointments {
        branch_id: String,
        date: NaiveDate,
    },
    Listen {
        channel: String,
    },
}

const BRANCH_COLUMNS: &[&str] = &["id", "timezone", "operating_hours", "name"];
const CALENDAR_COLUMNS: &[&str] = &["id", "branch_id", "date", "type", "title", "open", "close"];
const APPOINTMENT_COLUMNS: &[&str] = &[
    "id",
    "branch_id",
    "appointment_date",
    "duration",
    "stylist_id",
    "service_id",
    "services",
    "client_id",
    "client_name",
    "guest",
    "notes",
];
const RESCHEDULE_COLUMNS: &[&str] = &["appointment_id", "appointment_date", "duration"];
const STATUS_COLUMNS: &[&str] = &["appointment_id", "status"];

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let trimmed = sql.trim();
    if let Some(rest) = trimmed
        .get(..7)
        .filter(|prefix| prefix.eq_ignore_ascii_case("LISTEN "))
        .map(|_| &trimmed[7..])
    {
        let channel = rest.trim().trim_matches(';').trim().trim_matches('"').to_string();
        return Ok(Command::Listen { channel });
    }

    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    let Some(stmt) = stmts.first() else {
        return Err(SqlError::Empty);
    };

    match stmt {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

// ── INSERT ────────────────────────────────────────────────────

/// One VALUES row addressed by column name. Without an explicit column
/// list, values bind to the table's columns in declaration order.
struct Row<'a> {
    table: &'static str,
    columns: Vec<String>,
    values: &'a [Expr],
}

impl<'a> Row<'a> {
    fn new(table: &'static str, defaults: &[&str], insert: &ast::Insert, values: &'a [Expr]) -> Result<Self, SqlError> {
        let columns: Vec<String> = if insert.columns.is_empty() {
            if values.len() > defaults.len() {
                return Err(SqlError::WrongArity(table, defaults.len(), values.len()));
            }
            defaults[..values.len()].iter().map(|c| c.to_string()).collect()
        } else {
            insert
                .columns
                .iter()
                .map(|c| c.to_string().trim_matches('"').to_lowercase())
                .collect()
        };
        if columns.len() != values.len() {
            return Err(SqlError::WrongArity(table, columns.len(), values.len()));
        }
        if let Some(unknown) = columns.iter().find(|c| !defaults.contains(&c.as_str())) {
            return Err(SqlError::UnknownColumn(table, unknown.clone()));
        }
        Ok(Self { table, columns, values })
    }

    fn get(&self, column: &str) -> Option<&'a Expr> {
        self.columns
            .iter()
            .position(|c| c == column)
            .map(|i| &self.values[i])
    }

    /// Present and not NULL.
    fn non_null(&self, column: &str) -> Option<&'a Expr> {
        self.get(column).filter(|e| !is_null(e))
    }

    fn required(&self, column: &'static str) -> Result<&'a Expr, SqlError> {
        self.non_null(column)
            .ok_or(SqlError::MissingColumn(self.table, column))
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let values = extract_single_row(insert)?;

    match table.as_str() {
        "branches" => {
            let row = Row::new("branches", BRANCH_COLUMNS, insert, values)?;
            let branch = Branch {
                id: parse_string(row.required("id")?)?,
                name: row.non_null("name").map(parse_string).transpose()?,
                timezone: row
                    .non_null("timezone")
                    .map(parse_string)
                    .transpose()?
                    .unwrap_or_else(|| "UTC".to_string()),
                operating_hours: parse_json(row.required("operating_hours")?)?,
            };
            Ok(Command::UpsertBranch { branch })
        }
        "calendar_entries" => {
            let row = Row::new("calendar_entries", CALENDAR_COLUMNS, insert, values)?;
            let kind: CalendarEntryType = parse_string(row.required("type")?)?
                .parse()
                .map_err(SqlError::Parse)?;
            let open = row.non_null("open").map(parse_string).transpose()?;
            let close = row.non_null("close").map(parse_string).transpose()?;
            let special_hours = match (open, close) {
                (Some(open), Some(close)) => Some(SpecialHours { open, close }),
                (None, None) => None,
                _ => return Err(SqlError::Parse("open and close must be given together".into())),
            };
            let entry = CalendarEntry {
                id: parse_ulid(row.required("id")?)?,
                branch_id: parse_string(row.required("branch_id")?)?,
                date: parse_date(row.required("date")?)?,
                kind,
                title: row.non_null("title").map(parse_string).transpose()?,
                special_hours,
            };
            Ok(Command::InsertCalendarEntry { entry })
        }
        "appointments" => {
            let row = Row::new("appointments", APPOINTMENT_COLUMNS, insert, values)?;
            let appointment = NewAppointment {
                id: row.non_null("id").map(parse_ulid).transpose()?,
                branch_id: row
                    .non_null("branch_id")
                    .map(parse_string)
                    .transpose()?
                    .unwrap_or_default(),
                appointment_date: row.non_null("appointment_date").map(parse_instant).transpose()?,
                duration: row.non_null("duration").map(parse_u32).transpose()?,
                stylist_id: row.non_null("stylist_id").map(parse_string).transpose()?,
                service_id: row.non_null("service_id").map(parse_string).transpose()?,
                services: row
                    .non_null("services")
                    .map(parse_json::<Vec<ServiceLine>>)
                    .transpose()?
                    .unwrap_or_default(),
                client_id: row.non_null("client_id").map(parse_string).transpose()?,
                client_name: row.non_null("client_name").map(parse_string).transpose()?,
                is_guest: row.non_null("guest").map(parse_bool).transpose()?.unwrap_or(false),
                notes: row.non_null("notes").map(parse_string).transpose()?,
            };
            Ok(Command::InsertAppointment { appointment })
        }
        "reschedules" => {
            let row = Row::new("reschedules", RESCHEDULE_COLUMNS, insert, values)?;
            Ok(Command::Reschedule {
                id: parse_ulid(row.required("appointment_id")?)?,
                appointment_date: parse_instant(row.required("appointment_date")?)?,
                duration: row.non_null("duration").map(parse_u32).transpose()?,
            })
        }
        "status_changes" => {
            let row = Row::new("status_changes", STATUS_COLUMNS, insert, values)?;
            let status = parse_string(row.required("status")?)?
                .parse()
                .map_err(SqlError::Parse)?;
            Ok(Command::ChangeStatus {
                id: parse_ulid(row.required("appointment_id")?)?,
                status,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── DELETE ────────────────────────────────────────────────────

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let id = extract_where_id(&delete.selection)?;

    match table.as_str() {
        "calendar_entries" => Ok(Command::DeleteCalendarEntry { id }),
        "appointments" => Ok(Command::CancelAppointment { id }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── SELECT ────────────────────────────────────────────────────

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };
    let Some(from) = select.from.first() else {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    };
    let table = table_factor_name(&from.relation)?;

    let mut filters = Vec::new();
    if let Some(selection) = &select.selection {
        collect_filters(selection, &mut filters)?;
    }
    match table.as_str() {
        "availability" => {
            let duration = match filter(&filters, "duration") {
                Some(_) => parse_i64(single_filter(&filters, "duration")?)?,
                None => DEFAULT_DURATION_MINUTES as i64,
            };
            let stylist_ids = filter(&filters, "stylist_id")
                .map(|values| values.iter().map(|e| parse_string(e)).collect::<Result<Vec<_>, _>>())
                .transpose()?
                .unwrap_or_default();
            Ok(Command::SelectAvailability {
                branch_id: parse_string(single_filter(&filters, "branch_id")?)?,
                date: parse_date(single_filter(&filters, "date")?)?,
                duration,
                stylist_ids,
            })
        }
        "appointments" => Ok(Command::SelectAppointments {
            branch_id: parse_string(single_filter(&filters, "branch_id")?)?,
            date: parse_date(single_filter(&filters, "date")?)?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

type Filters<'a> = Vec<(String, Vec<&'a Expr>)>;

fn filter<'f, 'a>(filters: &'f Filters<'a>, column: &str) -> Option<&'f [&'a Expr]> {
    filters
        .iter()
        .find(|(col, _)| col == column)
        .map(|(_, values)| values.as_slice())
}

fn single_filter<'a>(filters: &Filters<'a>, column: &'static str) -> Result<&'a Expr, SqlError> {
    match filter(filters, column) {
        Some([value]) => Ok(*value),
        Some(_) => Err(SqlError::Parse(format!("{column} takes a single value"))),
        None => Err(SqlError::MissingFilter(column)),
    }
}

/// Flatten an AND-tree of `col = v` and `col IN (...)` into `(col, values)`.
fn collect_filters<'a>(expr: &'a Expr, out: &mut Filters<'a>) -> Result<(), SqlError> {
    match expr {
        Expr::BinaryOp { left, op: ast::BinaryOperator::And, right } => {
            collect_filters(left, out)?;
            collect_filters(right, out)
        }
        Expr::BinaryOp { left, op: ast::BinaryOperator::Eq, right } => {
            let col = expr_column_name(left)
                .ok_or_else(|| SqlError::Unsupported(format!("filter on {left}")))?;
            out.push((col, vec![right.as_ref()]));
            Ok(())
        }
        Expr::InList { expr, list, negated: false } => {
            let col = expr_column_name(expr)
                .ok_or_else(|| SqlError::Unsupported(format!("filter on {expr}")))?;
            out.push((col, list.iter().collect()));
            Ok(())
        }
        Expr::Nested(inner) => collect_filters(inner, out),
        other => Err(SqlError::Unsupported(format!("filter {other}"))),
    }
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
    match tables_with_joins.first() {
        Some(first) => table_factor_name(&first.relation),
        None => Err(SqlError::Parse("DELETE without table".into())),
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

/// Bookings are committed one at a time, so multi-row VALUES are refused.
fn extract_single_row(insert: &ast::Insert) -> Result<&[Expr], SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => match values.rows.as_slice() {
            [] => Err(SqlError::Parse("empty VALUES".into())),
            [row] => Ok(row.as_slice()),
            rows => Err(SqlError::Unsupported(format!(
                "multi-row INSERT ({} rows); insert one row per statement",
                rows.len()
            ))),
        },
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn extract_where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    match selection.as_ref() {
        Some(Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        }) if expr_column_name(left).as_deref() == Some("id") => parse_ulid(right),
        _ => Err(SqlError::MissingFilter("id")),
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

fn is_null(expr: &Expr) -> bool {
    matches!(extract_value(expr), Some(Value::Null))
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s) | Value::Number(s, _)) => Ok(s.clone()),
        Some(Value::DollarQuotedString(s)) => Ok(s.value.clone()),
        Some(other) => Err(SqlError::Parse(format!("expected string, got {other}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    let s = parse_string(expr)?;
    Ulid::from_string(&s).map_err(|e| SqlError::Parse(format!("bad ULID {s:?}: {e}")))
}

fn parse_i64(expr: &Expr) -> Result<i64, SqlError> {
    if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        return Ok(-parse_i64(expr)?);
    }
    match extract_value(expr) {
        Some(Value::Number(s, _) | Value::SingleQuotedString(s)) => s
            .trim()
            .parse()
            .map_err(|e| SqlError::Parse(format!("bad integer {s:?}: {e}"))),
        Some(other) => Err(SqlError::Parse(format!("expected number, got {other}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of range")))
}

/// Unix milliseconds, or an RFC 3339 timestamp string.
fn parse_instant(expr: &Expr) -> Result<Ms, SqlError> {
    if let Some(Value::SingleQuotedString(s)) = extract_value(expr)
        && s.trim().parse::<i64>().is_err()
    {
        return DateTime::parse_from_rfc3339(s.trim())
            .map(|dt| dt.timestamp_millis())
            .map_err(|e| SqlError::Parse(format!("bad timestamp {s:?}: {e}")));
    }
    parse_i64(expr)
}

fn parse_date(expr: &Expr) -> Result<NaiveDate, SqlError> {
    let s = parse_string(expr)?;
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .map_err(|e| SqlError::Parse(format!("bad date {s:?} (expected YYYY-MM-DD): {e}")))
}

fn parse_bool(expr: &Expr) -> Result<bool, SqlError> {
    match extract_value(expr) {
        Some(Value::Boolean(b)) => Ok(*b),
        Some(Value::SingleQuotedString(s)) => match s.to_lowercase().as_str() {
            "true" | "t" | "1" => Ok(true),
            "false" | "f" | "0" => Ok(false),
            _ => Err(SqlError::Parse(format!("bad bool: {s}"))),
        },
        Some(Value::Number(n, _)) => Ok(n != "0"),
        Some(other) => Err(SqlError::Parse(format!("expected bool, got {other}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_json<T: DeserializeOwned>(expr: &Expr) -> Result<T, SqlError> {
    let s = parse_string(expr)?;
    serde_json::from_str(&s).map_err(|e| SqlError::Json(e.to_string()))
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum SqlError {
    #[error("parse error: {0}")]
    Parse(String),
    #[error("empty query")]
    Empty,
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("unknown table: {0}")]
    UnknownTable(String),
    #[error("{0}: unknown column {1}")]
    UnknownColumn(&'static str, String),
    #[error("{0}: missing column {1}")]
    MissingColumn(&'static str, &'static str),
    #[error("{0}: expected {1} values, got {2}")]
    WrongArity(&'static str, usize, usize),
    #[error("missing filter: {0}")]
    MissingFilter(&'static str),
    #[error("invalid JSON: {0}")]
    Json(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: &str = "01ARZ3NDEKTSV4RRFFQ69G5FAV";

    #[test]
    fn parse_insert_branch() {
        let sql = r#"INSERT INTO branches (id, timezone, operating_hours, name) VALUES ('downtown', 'Europe/Helsinki', '{"monday": {"isOpen": true, "open": "09:00", "close": "17:00"}, "sunday": {"isOpen": false, "open": "", "close": ""}}', 'Downtown')"#;
        match parse_sql(sql).unwrap() {
            Command::UpsertBranch { branch } => {
                assert_eq!(branch.id, "downtown");
                assert_eq!(branch.timezone, "Europe/Helsinki");
                assert_eq!(branch.name.as_deref(), Some("Downtown"));
                let monday = branch.operating_hours.monday.unwrap();
                assert!(monday.is_open_day());
                assert_eq!(monday.open, "09:00");
                assert!(!branch.operating_hours.sunday.unwrap().is_open_day());
                assert!(branch.operating_hours.tuesday.is_none());
            }
            other => panic!("expected UpsertBranch, got {other:?}"),
        }
    }

    #[test]
    fn parse_insert_branch_null_timezone_defaults_to_utc() {
        let sql = r#"INSERT INTO branches (id, timezone, operating_hours) VALUES ('b1', NULL, '{}')"#;
        match parse_sql(sql).unwrap() {
            Command::UpsertBranch { branch } => assert_eq!(branch.timezone, "UTC"),
            other => panic!("expected UpsertBranch, got {other:?}"),
        }
    }

    #[test]
    fn parse_insert_branch_bad_json() {
        let sql = "INSERT INTO branches (id, timezone, operating_hours) VALUES ('b1', 'UTC', '{not json')";
        assert!(matches!(parse_sql(sql), Err(SqlError::Json(_))));
    }

    #[test]
    fn parse_insert_holiday() {
        let sql = format!(
            "INSERT INTO calendar_entries (id, branch_id, date, type, title) VALUES ('{ID}', 'b1', '2026-12-25', 'holiday', 'Christmas')"
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertCalendarEntry { entry } => {
                assert_eq!(entry.id.to_string(), ID);
                assert_eq!(entry.date, NaiveDate::from_ymd_opt(2026, 12, 25).unwrap());
                assert_eq!(entry.kind, CalendarEntryType::Holiday);
                assert_eq!(entry.title.as_deref(), Some("Christmas"));
                assert_eq!(entry.special_hours, None);
            }
            other => panic!("expected InsertCalendarEntry, got {other:?}"),
        }
    }

    #[test]
    fn parse_insert_special_hours() {
        let sql = format!(
            "INSERT INTO calendar_entries (id, branch_id, date, type, open, close) VALUES ('{ID}', 'b1', '2026-12-24', 'special_hours', '10:00', '14:00')"
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertCalendarEntry { entry } => {
                assert_eq!(entry.kind, CalendarEntryType::SpecialHours);
                assert_eq!(
                    entry.special_hours,
                    Some(SpecialHours {
                        open: "10:00".into(),
                        close: "14:00".into()
                    })
                );
            }
            other => panic!("expected InsertCalendarEntry, got {other:?}"),
        }
    }

    #[test]
    fn parse_insert_calendar_entry_bad_type() {
        let sql = format!(
            "INSERT INTO calendar_entries (id, branch_id, date, type) VALUES ('{ID}', 'b1', '2026-12-24', 'party')"
        );
        assert!(matches!(parse_sql(&sql), Err(SqlError::Parse(_))));
    }

    #[test]
    fn parse_insert_appointment_named_columns() {
        let sql = r#"INSERT INTO appointments (branch_id, appointment_date, client_id, services) VALUES ('b1', 1800000000000, 'c1', '[{"serviceId": "cut", "stylistId": "s1", "duration": 45}, {"serviceId": "color", "stylistId": "s2"}]')"#;
        match parse_sql(sql).unwrap() {
            Command::InsertAppointment { appointment } => {
                assert_eq!(appointment.id, None);
                assert_eq!(appointment.branch_id, "b1");
                assert_eq!(appointment.appointment_date, Some(1_800_000_000_000));
                assert_eq!(appointment.client_id.as_deref(), Some("c1"));
                assert_eq!(appointment.services.len(), 2);
                assert_eq!(appointment.services[0].stylist_id.as_deref(), Some("s1"));
                assert_eq!(appointment.services[0].duration, Some(45));
                assert!(!appointment.is_guest);
            }
            other => panic!("expected InsertAppointment, got {other:?}"),
        }
    }

    #[test]
    fn parse_insert_appointment_positional() {
        let sql = format!(
            "INSERT INTO appointments VALUES ('{ID}', 'b1', '2026-10-19T10:00:00Z', 30, 's1', 'cut', NULL, NULL, 'Walk In', true)"
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertAppointment { appointment } => {
                assert_eq!(appointment.id.map(|i| i.to_string()).as_deref(), Some(ID));
                let expected = NaiveDate::from_ymd_opt(2026, 10, 19)
                    .unwrap()
                    .and_hms_opt(10, 0, 0)
                    .unwrap()
                    .and_utc()
                    .timestamp_millis();
                assert_eq!(appointment.appointment_date, Some(expected));
                assert_eq!(appointment.duration, Some(30));
                assert_eq!(appointment.stylist_id.as_deref(), Some("s1"));
                assert!(appointment.services.is_empty());
                assert_eq!(appointment.client_id, None);
                assert_eq!(appointment.client_name.as_deref(), Some("Walk In"));
                assert!(appointment.is_guest);
            }
            other => panic!("expected InsertAppointment, got {other:?}"),
        }
    }

    #[test]
    fn parse_insert_appointment_unknown_column() {
        let sql = "INSERT INTO appointments (branch_id, price) VALUES ('b1', 10)";
        assert!(matches!(parse_sql(sql), Err(SqlError::UnknownColumn("appointments", _))));
    }

    #[test]
    fn multi_row_insert_rejected() {
        let sql = "INSERT INTO appointments (branch_id, client_id) VALUES ('b1', 'c1'), ('b1', 'c2')";
        assert!(matches!(parse_sql(sql), Err(SqlError::Unsupported(_))));
    }

    #[test]
    fn parse_reschedule() {
        let sql = format!("INSERT INTO reschedules (appointment_id, appointment_date) VALUES ('{ID}', 1800000000000)");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::Reschedule {
                id: Ulid::from_string(ID).unwrap(),
                appointment_date: 1_800_000_000_000,
                duration: None,
            }
        );
        let with_duration = format!("INSERT INTO reschedules VALUES ('{ID}', 1800000000000, 90)");
        assert!(matches!(
            parse_sql(&with_duration).unwrap(),
            Command::Reschedule { duration: Some(90), .. }
        ));
    }

    #[test]
    fn parse_status_change() {
        let sql = format!("INSERT INTO status_changes (appointment_id, status) VALUES ('{ID}', 'in_service')");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::ChangeStatus {
                id: Ulid::from_string(ID).unwrap(),
                status: AppointmentStatus::InService,
            }
        );
        let bad = format!("INSERT INTO status_changes (appointment_id, status) VALUES ('{ID}', 'teleported')");
        assert!(parse_sql(&bad).is_err());
    }

    #[test]
    fn parse_deletes() {
        let cancel = format!("DELETE FROM appointments WHERE id = '{ID}'");
        assert!(matches!(parse_sql(&cancel).unwrap(), Command::CancelAppointment { .. }));
        let entry = format!("DELETE FROM calendar_entries WHERE id = '{ID}'");
        assert!(matches!(parse_sql(&entry).unwrap(), Command::DeleteCalendarEntry { .. }));
        assert!(matches!(
            parse_sql("DELETE FROM appointments WHERE branch_id = 'b1'"),
            Err(SqlError::MissingFilter("id"))
        ));
    }

    #[test]
    fn parse_select_availability() {
        let sql = "SELECT * FROM availability WHERE branch_id = 'b1' AND date = '2026-10-19' AND duration = 45 AND stylist_id IN ('s1', 's2')";
        assert_eq!(
            parse_sql(sql).unwrap(),
            Command::SelectAvailability {
                branch_id: "b1".into(),
                date: NaiveDate::from_ymd_opt(2026, 10, 19).unwrap(),
                duration: 45,
                stylist_ids: vec!["s1".into(), "s2".into()],
            }
        );
    }

    #[test]
    fn parse_select_availability_single_stylist_default_duration() {
        let sql = "SELECT * FROM availability WHERE branch_id = 'b1' AND date = '2026-10-19' AND stylist_id = 's1'";
        match parse_sql(sql).unwrap() {
            Command::SelectAvailability { duration, stylist_ids, .. } => {
                assert_eq!(duration, 60);
                assert_eq!(stylist_ids, vec!["s1".to_string()]);
            }
            other => panic!("expected SelectAvailability, got {other:?}"),
        }
    }

    #[test]
    fn parse_select_availability_requires_date() {
        let sql = "SELECT * FROM availability WHERE branch_id = 'b1'";
        assert!(matches!(parse_sql(sql), Err(SqlError::MissingFilter("date"))));
    }

    #[test]
    fn parse_select_appointments() {
        let sql = "SELECT * FROM appointments WHERE branch_id = 'b1' AND date = '2026-10-19'";
        assert!(matches!(parse_sql(sql).unwrap(), Command::SelectAppointments { .. }));
    }

    #[test]
    fn parse_listen() {
        assert_eq!(
            parse_sql("LISTEN stylist_s1;").unwrap(),
            Command::Listen {
                channel: "stylist_s1".into()
            }
        );
        assert_eq!(
            parse_sql("listen \"client_c1\"").unwrap(),
            Command::Listen {
                channel: "client_c1".into()
            }
        );
    }

    #[test]
    fn multibyte_text_at_the_prefix_boundary() {
        let sql = "-- café\nSELECT * FROM availability WHERE branch_id = 'b1' AND date = '2026-10-19'";
        assert!(matches!(
            parse_sql(sql).unwrap(),
            Command::SelectAvailability { ref branch_id, .. } if branch_id == "b1"
        ));
        assert!(parse_sql("LISTEé stylist_s1").is_err());
        assert!(parse_sql("ñ").is_err());
        assert_eq!(
            parse_sql("LISTEN stylist_é").unwrap(),
            Command::Listen {
                channel: "stylist_é".into()
            }
        );
    }

    #[test]
    fn parse_unknown_table_errors() {
        let sql = format!("INSERT INTO resources (id) VALUES ('{ID}')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::UnknownTable(_))));
    }

    #[test]
    fn parse_empty_errors() {
        assert!(matches!(parse_sql(""), Err(SqlError::Empty)));
    }
}
