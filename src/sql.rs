use chrono::{DateTime, NaiveDate, NaiveDateTime, Weekday};
use sqlparser::ast::{
    self, AssignmentTarget, BinaryOperator, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor,
    TableObject, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::engine::NewBooking;
use crate::model::*;

/// One row of `INSERT INTO schedules`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleRow {
    pub staff_id: Ulid,
    pub weekday: Weekday,
    pub hours: Span,
}

/// One row of `INSERT INTO overrides`. `hours == None` closes the date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverrideRow {
    pub staff_id: Ulid,
    pub date: NaiveDate,
    pub hours: Option<Span>,
}

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertTenant {
        id: Ulid,
        domain: String,
    },
    UpdateTenantDomain {
        id: Ulid,
        domain: String,
    },
    UpdateTenantActive {
        id: Ulid,
        active: bool,
    },
    SelectTenant {
        domain: String,
    },
    InsertStaff {
        staff: Vec<(Ulid, Option<String>)>,
    },
    DeleteStaff {
        id: Ulid,
    },
    InsertSchedules {
        rows: Vec<ScheduleRow>,
    },
    DeleteSchedule {
        staff_id: Ulid,
        weekday: Weekday,
    },
    InsertOverrides {
        rows: Vec<OverrideRow>,
    },
    DeleteOverride {
        staff_id: Ulid,
        date: NaiveDate,
    },
    InsertBooking {
        booking: NewBooking,
    },
    BatchInsertBookings {
        bookings: Vec<NewBooking>,
    },
    UpdateBookingStatus {
        id: Ulid,
        status: BookingStatus,
    },
    RescheduleBooking {
        id: Ulid,
        start: Ms,
        end: Ms,
        staff_id: Option<Ulid>,
    },
    /// Cancels; bookings are never physically removed.
    DeleteBooking {
        id: Ulid,
    },
    SelectSlots {
        staff_id: Ulid,
        date: NaiveDate,
        duration_min: u32,
    },
    SelectConflict {
        staff_id: Ulid,
        start: Ms,
        end: Ms,
        exclude_id: Option<Ulid>,
    },
    SelectStaff,
    SelectSchedules {
        staff_id: Option<Ulid>,
    },
    SelectOverrides {
        staff_id: Option<Ulid>,
    },
    SelectBookings {
        staff_id: Option<Ulid>,
        ids: Vec<Ulid>,
        window: Option<Span>,
    },
    Listen {
        channel: String,
    },
    /// `None` drops every subscription (`UNLISTEN *`).
    Unlisten {
        channel: Option<String>,
    },
}

/// Case-insensitive ASCII prefix match that never splits a multibyte char.
fn strip_keyword<'a>(sql: &'a str, keyword: &str) -> Option<&'a str> {
    let head = sql.get(..keyword.len())?;
    head.eq_ignore_ascii_case(keyword).then(|| &sql[keyword.len()..])
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let trimmed = sql.trim();
    if let Some(rest) = strip_keyword(trimmed, "LISTEN ") {
        let channel = rest.trim().trim_end_matches(';').trim().trim_matches('"').to_string();
        if channel.is_empty() {
            return Err(SqlError::Parse("LISTEN without channel".into()));
        }
        return Ok(Command::Listen { channel });
    }
    if let Some(rest) = strip_keyword(trimmed, "UNLISTEN ") {
        let channel = rest.trim().trim_end_matches(';').trim().trim_matches('"').to_string();
        return Ok(Command::Unlisten { channel: (channel != "*" && !channel.is_empty()).then_some(channel) });
    }

    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }

    match &stmts[0] {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Update { table, assignments, selection, .. } => {
            let table = table_factor_name(&table.relation)?;
            parse_update(&table, assignments, selection.as_ref())
        }
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

// ── INSERT ────────────────────────────────────────────────────

/// Column order assumed when an INSERT omits its column list.
fn default_columns(table: &str) -> Option<&'static [&'static str]> {
    Some(match table {
        "tenants" => &["id", "domain"],
        "staff" => &["id", "name"],
        "schedules" => &["staff_id", "weekday", "start", "end"],
        "overrides" => &["staff_id", "date", "start", "end"],
        "bookings" => &["id", "staff_id", "service_id", "client", "start", "end", "status"],
        _ => return None,
    })
}

/// An INSERT row addressed by column name.
struct Row<'a> {
    table: &'static str,
    columns: &'a [String],
    values: &'a [Expr],
}

impl Row<'_> {
    fn get(&self, col: &str) -> Option<&Expr> {
        self.columns.iter().position(|c| c == col).map(|i| &self.values[i])
    }

    fn require(&self, col: &'static str) -> Result<&Expr, SqlError> {
        self.get(col).ok_or(SqlError::MissingColumn(self.table, col))
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let defaults = default_columns(&table).ok_or_else(|| SqlError::UnknownTable(table.clone()))?;
    let table: &'static str = defaults_table_name(&table);
    let rows = extract_all_insert_rows(insert)?;

    let explicit: Vec<String> = insert.columns.iter().map(|c| c.value.to_lowercase()).collect();
    for col in &explicit {
        if !defaults.contains(&col.as_str()) {
            return Err(SqlError::UnknownColumn(table, col.clone()));
        }
    }

    let mut parsed = Vec::with_capacity(rows.len());
    for (i, values) in rows.iter().enumerate() {
        let columns: Vec<String> = if explicit.is_empty() {
            if values.len() > defaults.len() {
                return Err(SqlError::WrongArity(table, defaults.len(), values.len()));
            }
            defaults[..values.len()].iter().map(|c| c.to_string()).collect()
        } else {
            if values.len() != explicit.len() {
                return Err(SqlError::WrongArity(table, explicit.len(), values.len()));
            }
            explicit.clone()
        };
        let row = Row { table, columns: &columns, values };
        let cmd = parse_insert_row(&row).map_err(|e| match e {
            SqlError::Parse(msg) if rows.len() > 1 => SqlError::Parse(format!("row {i}: {msg}")),
            other => other,
        })?;
        parsed.push(cmd);
    }
    merge_insert_rows(table, parsed)
}

fn defaults_table_name(table: &str) -> &'static str {
    match table {
        "tenants" => "tenants",
        "staff" => "staff",
        "schedules" => "schedules",
        "overrides" => "overrides",
        _ => "bookings",
    }
}

/// Parse one row into a single-row command; `merge_insert_rows` folds them.
fn parse_insert_row(row: &Row<'_>) -> Result<Command, SqlError> {
    match row.table {
        "tenants" => Ok(Command::InsertTenant {
            id: parse_ulid_expr(row.require("id")?)?,
            domain: parse_string_expr(row.require("domain")?)?,
        }),
        "staff" => {
            let name = match row.get("name") {
                Some(expr) => parse_string_or_null(expr)?,
                None => None,
            };
            Ok(Command::InsertStaff { staff: vec![(parse_ulid_expr(row.require("id")?)?, name)] })
        }
        "schedules" => {
            let hours = parse_hours(row.require("start")?, row.require("end")?)?;
            Ok(Command::InsertSchedules {
                rows: vec![ScheduleRow {
                    staff_id: parse_ulid_expr(row.require("staff_id")?)?,
                    weekday: parse_weekday_expr(row.require("weekday")?)?,
                    hours,
                }],
            })
        }
        "overrides" => {
            let hours = match (row.get("start"), row.get("end")) {
                (None, None) => None,
                (Some(s), Some(e)) if is_null(s) && is_null(e) => None,
                (Some(s), Some(e)) => Some(parse_hours(s, e)?),
                _ => return Err(SqlError::Parse("overrides need both start and end, or neither".into())),
            };
            Ok(Command::InsertOverrides {
                rows: vec![OverrideRow {
                    staff_id: parse_ulid_expr(row.require("staff_id")?)?,
                    date: parse_date_expr(row.require("date")?)?,
                    hours,
                }],
            })
        }
        _ => {
            let status = match row.get("status") {
                Some(expr) => parse_status_expr(expr)?,
                None => BookingStatus::Pending,
            };
            Ok(Command::InsertBooking {
                booking: NewBooking {
                    id: parse_ulid_expr(row.require("id")?)?,
                    staff_id: parse_ulid_expr(row.require("staff_id")?)?,
                    service_id: parse_ulid_expr(row.require("service_id")?)?,
                    client: parse_string_expr(row.require("client")?)?,
                    start: parse_instant_expr(row.require("start")?)?,
                    end: parse_instant_expr(row.require("end")?)?,
                    status,
                },
            })
        }
    }
}

fn merge_insert_rows(table: &'static str, mut parsed: Vec<Command>) -> Result<Command, SqlError> {
    if parsed.len() == 1 {
        return parsed.pop().ok_or(SqlError::Empty);
    }
    match table {
        "tenants" => Err(SqlError::Unsupported("multi-row tenant insert".into())),
        "staff" => Ok(Command::InsertStaff {
            staff: parsed
                .into_iter()
                .flat_map(|c| match c {
                    Command::InsertStaff { staff } => staff,
                    _ => Vec::new(),
                })
                .collect(),
        }),
        "schedules" => Ok(Command::InsertSchedules {
            rows: parsed
                .into_iter()
                .flat_map(|c| match c {
                    Command::InsertSchedules { rows } => rows,
                    _ => Vec::new(),
                })
                .collect(),
        }),
        "overrides" => Ok(Command::InsertOverrides {
            rows: parsed
                .into_iter()
                .flat_map(|c| match c {
                    Command::InsertOverrides { rows } => rows,
                    _ => Vec::new(),
                })
                .collect(),
        }),
        _ => Ok(Command::BatchInsertBookings {
            bookings: parsed
                .into_iter()
                .filter_map(|c| match c {
                    Command::InsertBooking { booking } => Some(booking),
                    _ => None,
                })
                .collect(),
        }),
    }
}

// ── UPDATE ────────────────────────────────────────────────────

fn parse_update(table: &str, assignments: &[ast::Assignment], selection: Option<&Expr>) -> Result<Command, SqlError> {
    let mut set: Vec<(String, &Expr)> = Vec::with_capacity(assignments.len());
    for a in assignments {
        let col = match &a.target {
            AssignmentTarget::ColumnName(name) => object_name_last(name),
            AssignmentTarget::Tuple(_) => None,
        }
        .ok_or_else(|| SqlError::Unsupported("tuple assignment".into()))?;
        set.push((col, &a.value));
    }
    let assigned = |col: &str| set.iter().find(|(c, _)| c == col).map(|(_, e)| *e);
    let only = |allowed: &[&str]| -> Result<(), SqlError> {
        match set.iter().find(|(c, _)| !allowed.contains(&c.as_str())) {
            Some((c, _)) => Err(SqlError::Unsupported(format!("cannot update {table}.{c}"))),
            None => Ok(()),
        }
    };

    let filters = Filters::from_selection(selection)?;
    filters.ensure_only(&["id"])?;
    let id = parse_ulid_expr(filters.eq("id").ok_or(SqlError::MissingFilter("id"))?)?;

    match table {
        "tenants" => {
            only(&["domain", "active"])?;
            match (assigned("domain"), assigned("active")) {
                (Some(domain), None) => Ok(Command::UpdateTenantDomain { id, domain: parse_string_expr(domain)? }),
                (None, Some(active)) => Ok(Command::UpdateTenantActive { id, active: parse_bool(active)? }),
                _ => Err(SqlError::Unsupported("update either domain or active".into())),
            }
        }
        "bookings" => {
            if let Some(status) = assigned("status") {
                only(&["status"])?;
                return Ok(Command::UpdateBookingStatus { id, status: parse_status_expr(status)? });
            }
            only(&["start", "end", "staff_id"])?;
            Ok(Command::RescheduleBooking {
                id,
                start: parse_instant_expr(assigned("start").ok_or(SqlError::MissingColumn("bookings", "start"))?)?,
                end: parse_instant_expr(assigned("end").ok_or(SqlError::MissingColumn("bookings", "end"))?)?,
                staff_id: assigned("staff_id").map(parse_ulid_expr).transpose()?,
            })
        }
        _ => Err(SqlError::UnknownTable(table.to_string())),
    }
}

// ── DELETE ────────────────────────────────────────────────────

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let filters = Filters::from_selection(delete.selection.as_ref())?;

    match table.as_str() {
        "staff" => {
            filters.ensure_only(&["id"])?;
            Ok(Command::DeleteStaff { id: filters.ulid("id")? })
        }
        "schedules" => {
            filters.ensure_only(&["staff_id", "weekday"])?;
            Ok(Command::DeleteSchedule {
                staff_id: filters.ulid("staff_id")?,
                weekday: parse_weekday_expr(filters.eq("weekday").ok_or(SqlError::MissingFilter("weekday"))?)?,
            })
        }
        "overrides" => {
            filters.ensure_only(&["staff_id", "date"])?;
            Ok(Command::DeleteOverride {
                staff_id: filters.ulid("staff_id")?,
                date: parse_date_expr(filters.eq("date").ok_or(SqlError::MissingFilter("date"))?)?,
            })
        }
        "bookings" => {
            filters.ensure_only(&["id"])?;
            Ok(Command::DeleteBooking { id: filters.ulid("id")? })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── SELECT ────────────────────────────────────────────────────

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;
    let filters = Filters::from_selection(select.selection.as_ref())?;

    match table.as_str() {
        "tenants" => {
            filters.ensure_only(&["domain"])?;
            let domain = filters.eq("domain").ok_or(SqlError::MissingFilter("domain"))?;
            Ok(Command::SelectTenant { domain: parse_string_expr(domain)? })
        }
        "slots" => {
            filters.ensure_only(&["staff_id", "date", "duration"])?;
            let duration = parse_i64_expr(filters.eq("duration").ok_or(SqlError::MissingFilter("duration"))?)?;
            Ok(Command::SelectSlots {
                staff_id: filters.ulid("staff_id")?,
                date: parse_date_expr(filters.eq("date").ok_or(SqlError::MissingFilter("date"))?)?,
                duration_min: u32::try_from(duration)
                    .map_err(|_| SqlError::Parse(format!("bad duration: {duration}")))?,
            })
        }
        "conflicts" => {
            filters.ensure_only(&["staff_id", "start", "end", "exclude_id"])?;
            Ok(Command::SelectConflict {
                staff_id: filters.ulid("staff_id")?,
                start: parse_instant_expr(filters.eq("start").ok_or(SqlError::MissingFilter("start"))?)?,
                end: parse_instant_expr(filters.eq("end").ok_or(SqlError::MissingFilter("end"))?)?,
                exclude_id: filters.eq("exclude_id").map(parse_ulid_or_null).transpose()?.flatten(),
            })
        }
        "staff" => {
            filters.ensure_only(&[])?;
            Ok(Command::SelectStaff)
        }
        "schedules" => {
            filters.ensure_only(&["staff_id"])?;
            Ok(Command::SelectSchedules { staff_id: filters.eq("staff_id").map(parse_ulid_expr).transpose()? })
        }
        "overrides" => {
            filters.ensure_only(&["staff_id"])?;
            Ok(Command::SelectOverrides { staff_id: filters.eq("staff_id").map(parse_ulid_expr).transpose()? })
        }
        "bookings" => {
            filters.ensure_only(&["staff_id", "id", "start", "end"])?;
            let mut ids = Vec::new();
            if let Some(id) = filters.eq("id") {
                ids.push(parse_ulid_expr(id)?);
            }
            if let Some(list) = filters.in_list("id") {
                for expr in list {
                    ids.push(parse_ulid_expr(expr)?);
                }
            }
            let from = filters.op("start", &BinaryOperator::GtEq).map(parse_instant_expr).transpose()?;
            let to = filters.op("end", &BinaryOperator::LtEq).map(parse_instant_expr).transpose()?;
            let window = match (from, to) {
                (Some(s), Some(e)) if s < e => Some(Span::new(s, e)),
                (None, None) => None,
                _ => return Err(SqlError::Parse("bookings window needs start >= .. AND \"end\" <= ..".into())),
            };
            Ok(Command::SelectBookings {
                staff_id: filters.eq("staff_id").map(parse_ulid_expr).transpose()?,
                ids,
                window,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// Flattened `col <op> value AND ...` conditions of a WHERE clause.
#[derive(Default)]
struct Filters {
    conds: Vec<(String, BinaryOperator, Expr)>,
    lists: Vec<(String, Vec<Expr>)>,
}

impl Filters {
    fn from_selection(selection: Option<&Expr>) -> Result<Self, SqlError> {
        let mut filters = Filters::default();
        if let Some(expr) = selection {
            filters.collect(expr)?;
        }
        Ok(filters)
    }

    fn collect(&mut self, expr: &Expr) -> Result<(), SqlError> {
        match expr {
            Expr::Nested(inner) => self.collect(inner),
            Expr::BinaryOp { left, op: BinaryOperator::And, right } => {
                self.collect(left)?;
                self.collect(right)
            }
            Expr::BinaryOp { left, op, right } => {
                let col = expr_column_name(left)
                    .ok_or_else(|| SqlError::Unsupported(format!("filter on {left}")))?;
                match op {
                    BinaryOperator::Eq | BinaryOperator::GtEq | BinaryOperator::LtEq => {
                        self.conds.push((col, op.clone(), (**right).clone()));
                        Ok(())
                    }
                    other => Err(SqlError::Unsupported(format!("operator {other} on {col}"))),
                }
            }
            Expr::InList { expr, list, negated: false } => {
                let col = expr_column_name(expr)
                    .ok_or_else(|| SqlError::Unsupported(format!("filter on {expr}")))?;
                if list.len() > crate::limits::MAX_IN_CLAUSE_ROWS {
                    return Err(SqlError::Parse("IN list too long".into()));
                }
                self.lists.push((col, list.clone()));
                Ok(())
            }
            other => Err(SqlError::Unsupported(format!("WHERE {other}"))),
        }
    }

    fn op(&self, col: &str, op: &BinaryOperator) -> Option<&Expr> {
        self.conds.iter().find(|(c, o, _)| c == col && o == op).map(|(_, _, e)| e)
    }

    fn eq(&self, col: &str) -> Option<&Expr> {
        self.op(col, &BinaryOperator::Eq)
    }

    fn in_list(&self, col: &str) -> Option<&[Expr]> {
        self.lists.iter().find(|(c, _)| c == col).map(|(_, l)| l.as_slice())
    }

    fn ulid(&self, col: &'static str) -> Result<Ulid, SqlError> {
        parse_ulid_expr(self.eq(col).ok_or(SqlError::MissingFilter(col))?)
    }

    fn ensure_only(&self, allowed: &[&str]) -> Result<(), SqlError> {
        let cols = self.conds.iter().map(|(c, _, _)| c).chain(self.lists.iter().map(|(c, _)| c));
        for col in cols {
            if !allowed.contains(&col.as_str()) {
                return Err(SqlError::Unsupported(format!("filter on {col}")));
            }
        }
        Ok(())
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
            if values.rows.len() > crate::limits::MAX_IN_CLAUSE_ROWS {
                return Err(SqlError::Parse("too many VALUES rows".into()));
            }
            Ok(values.rows.clone())
        }
        _ => Err(SqlError::Parse("expected VALUES".into())),
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

fn parse_string_expr(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => Ok(s.clone()),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    if is_null(expr) { Ok(None) } else { parse_string_expr(expr).map(Some) }
}

fn parse_ulid_expr(expr: &Expr) -> Result<Ulid, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::SingleQuotedString(s) | Value::Number(s, _) => {
                Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
            }
            _ => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_ulid_or_null(expr: &Expr) -> Result<Option<Ulid>, SqlError> {
    if is_null(expr) { Ok(None) } else { parse_ulid_expr(expr).map(Some) }
}

fn parse_i64_expr(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad i64: {e}"))),
            Value::SingleQuotedString(s) => s
                .trim()
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad i64: {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value:?}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_i64_expr(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_bool(expr: &Expr) -> Result<bool, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Boolean(b) => Ok(*b),
            Value::SingleQuotedString(s) => match s.to_lowercase().as_str() {
                "true" | "t" | "1" => Ok(true),
                "false" | "f" | "0" => Ok(false),
                _ => Err(SqlError::Parse(format!("bad bool: {s}"))),
            },
            Value::Number(n, _) => Ok(n != "0"),
            _ => Err(SqlError::Parse(format!("expected bool, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_status_expr(expr: &Expr) -> Result<BookingStatus, SqlError> {
    let s = parse_string_expr(expr)?;
    BookingStatus::parse(&s).ok_or_else(|| SqlError::Parse(format!("bad status: {s}")))
}

/// Unix milliseconds, or an RFC 3339 / `YYYY-MM-DD HH:MM[:SS]` UTC timestamp.
fn parse_instant_expr(expr: &Expr) -> Result<Ms, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => parse_instant(s),
        _ => parse_i64_expr(expr),
    }
}

pub fn parse_instant(s: &str) -> Result<Ms, SqlError> {
    let s = s.trim();
    if let Ok(ms) = s.parse::<i64>() {
        return Ok(ms);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.timestamp_millis());
    }
    ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|dt| dt.and_utc().timestamp_millis())
        .ok_or_else(|| SqlError::Parse(format!("bad timestamp: {s}")))
}

/// `HH:MM` or `HH:MM:SS` as an offset from midnight. `24:00` ends the day.
pub fn parse_time_of_day(s: &str) -> Result<Ms, SqlError> {
    let bad = || SqlError::Parse(format!("bad time of day: {s}"));
    let mut parts = s.trim().split(':');
    let mut field = |max: i64| -> Result<Option<i64>, SqlError> {
        match parts.next() {
            None => Ok(None),
            Some(p) if (1..=2).contains(&p.len()) && p.bytes().all(|b| b.is_ascii_digit()) => {
                let v: i64 = p.parse().map_err(|_| bad())?;
                if v > max { Err(bad()) } else { Ok(Some(v)) }
            }
            Some(_) => Err(bad()),
        }
    };
    let h = field(24)?.ok_or_else(bad)?;
    let m = field(59)?.ok_or_else(bad)?;
    let sec = field(59)?.unwrap_or(0);
    if parts.next().is_some() {
        return Err(bad());
    }
    let ms = ((h * 60 + m) * 60 + sec) * 1000;
    if ms > DAY_MS { Err(bad()) } else { Ok(ms) }
}

fn parse_hours(start: &Expr, end: &Expr) -> Result<Span, SqlError> {
    let s = parse_time_of_day(&parse_string_expr(start)?)?;
    let e = parse_time_of_day(&parse_string_expr(end)?)?;
    if s >= e {
        return Err(SqlError::Parse(format!(
            "working hours must start before they end: {}-{}",
            format_time_of_day(s),
            format_time_of_day(e)
        )));
    }
    Ok(Span::new(s, e))
}

/// Weekday name (`'mon'`, `'Monday'`) or number with 0 = Sunday.
pub fn parse_weekday(s: &str) -> Result<Weekday, SqlError> {
    let s = s.trim();
    if let Ok(n) = s.parse::<u8>() {
        return match n {
            0 => Ok(Weekday::Sun),
            1..=6 => Ok(WEEKDAYS[usize::from(n) - 1]),
            _ => Err(SqlError::Parse(format!("weekday out of range: {n}"))),
        };
    }
    s.parse::<Weekday>().map_err(|_| SqlError::Parse(format!("bad weekday: {s}")))
}

fn parse_weekday_expr(expr: &Expr) -> Result<Weekday, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s) | Value::Number(s, _)) => parse_weekday(s),
        _ => Err(SqlError::Parse(format!("expected weekday, got {expr}"))),
    }
}

fn parse_date_expr(expr: &Expr) -> Result<NaiveDate, SqlError> {
    let s = parse_string_expr(expr)?;
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").map_err(|e| SqlError::Parse(format!("bad date {s}: {e}")))
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    UnknownColumn(&'static str, String),
    WrongArity(&'static str, usize, usize),
    MissingColumn(&'static str, &'static str),
    MissingFilter(&'static str),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::UnknownColumn(t, c) => write!(f, "unknown column {t}.{c}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingColumn(t, col) => write!(f, "{t}: missing column {col}"),
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}
