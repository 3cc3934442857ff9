use sqlparser::ast::{
    self, Expr, FromTable, ObjectNamePart, OrderByKind, SetExpr, Statement, TableFactor, TableObject, Value,
    ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::engine::{RoomUpdate, UserUpdate};
use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertUser {
        id: Ulid,
        username: String,
        email: Option<String>,
        role: Role,
        password: String,
    },
    UpdateUser {
        id: Ulid,
        update: UserUpdate,
    },
    DeleteUser {
        id: Ulid,
    },
    InsertRoom {
        room: Room,
    },
    UpdateRoom {
        id: Ulid,
        update: RoomUpdate,
    },
    DeleteRoom {
        id: Ulid,
    },
    InsertBooking {
        id: Ulid,
        room_id: Ulid,
        start: Ms,
        end: Ms,
        title: Option<String>,
    },
    UpdateBooking {
        id: Ulid,
        start: Ms,
        end: Ms,
    },
    DeleteBooking {
        id: Ulid,
    },
    SelectBookings {
        room_id: Option<Ulid>,
        user_id: Option<Ulid>,
        start: Option<Ms>,
        end: Option<Ms>,
    },
    SelectRooms {
        filter: RoomFilter,
    },
    SelectUsers {
        filter: UserFilter,
    },
    SelectSchedule {
        room_id: Ulid,
        day: Ms,
    },
    SelectFrequentBookers {
        day: Ms,
        ascending: bool,
    },
    Sweep,
    Listen {
        channel: String,
    },
    Unlisten {
        channel: String,
    },
    UnlistenAll,
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let trimmed = sql.trim().trim_end_matches(';').trim();
    let upper = trimmed.to_ascii_uppercase();
    if upper == "SWEEP" {
        return Ok(Command::Sweep);
    }
    if upper.starts_with("LISTEN ") {
        let channel = trimmed[7..].trim().trim_matches('"').to_string();
        return Ok(Command::Listen { channel });
    }
    if upper == "UNLISTEN *" {
        return Ok(Command::UnlistenAll);
    }
    if upper.starts_with("UNLISTEN ") {
        let channel = trimmed[9..].trim().trim_matches('"').to_string();
        return Ok(Command::Unlisten { channel });
    }

    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }

    match &stmts[0] {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(table, assignments, selection),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

// ── INSERT ────────────────────────────────────────────────────

/// Column order assumed when an INSERT names no columns.
fn default_columns(table: &str) -> &'static [&'static str] {
    match table {
        "users" => &["id", "username", "password", "email", "role"],
        "rooms" => &["id", "code", "name", "location", "capacity", "facilities"],
        "bookings" => &["id", "room_id", "start", "end", "title"],
        _ => &[],
    }
}

/// One VALUES row, addressable by column name.
struct Row<'a> {
    table: &'static str,
    columns: Vec<String>,
    values: &'a [Expr],
}

impl<'a> Row<'a> {
    fn get(&self, col: &str) -> Option<&'a Expr> {
        let pos = self.columns.iter().position(|c| c == col)?;
        self.values.get(pos)
    }

    fn require(&self, col: &'static str) -> Result<&'a Expr, SqlError> {
        self.get(col).ok_or(SqlError::MissingColumn(self.table, col))
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let table: &'static str = match table.as_str() {
        "users" => "users",
        "rooms" => "rooms",
        "bookings" => "bookings",
        _ => return Err(SqlError::UnknownTable(table)),
    };
    let values = extract_insert_values(insert)?;
    let columns = if insert.columns.is_empty() {
        default_columns(table).iter().map(|c| c.to_string()).collect()
    } else {
        insert.columns.iter().map(|c| c.value.to_lowercase()).collect()
    };
    let row = Row {
        table,
        columns,
        values: &values,
    };

    match table {
        "users" => {
            let role = match row.get("role") {
                Some(expr) => match parse_string_or_null(expr)? {
                    Some(s) => Role::parse(&s).ok_or_else(|| SqlError::Parse(format!("bad role: {s}")))?,
                    None => Role::Member,
                },
                None => Role::Member,
            };
            Ok(Command::InsertUser {
                id: parse_ulid_expr(row.require("id")?)?,
                username: parse_string(row.require("username")?)?,
                email: row.get("email").map(parse_string_or_null).transpose()?.flatten(),
                role,
                password: parse_string(row.require("password")?)?,
            })
        }
        "rooms" => {
            let optional = |col: &str| row.get(col).map(parse_string_or_null).transpose().map(Option::flatten);
            let room = Room {
                id: parse_ulid_expr(row.require("id")?)?,
                code: parse_string(row.require("code")?)?,
                display_name: optional("name")?,
                location: optional("location")?,
                capacity: row.get("capacity").map(parse_u32).transpose()?.unwrap_or(1),
                facilities: optional("facilities")?
                    .map(|s| split_facilities(&s))
                    .unwrap_or_default(),
                status: RoomStatus::Available,
            };
            Ok(Command::InsertRoom { room })
        }
        _ => Ok(Command::InsertBooking {
            id: parse_ulid_expr(row.require("id")?)?,
            room_id: parse_ulid_expr(row.require("room_id")?)?,
            start: parse_i64_expr(row.require("start")?)?,
            end: parse_i64_expr(row.require("end")?)?,
            title: row.get("title").map(parse_string_or_null).transpose()?.flatten(),
        }),
    }
}

/// `"projector, whiteboard"` → `["projector", "whiteboard"]`
fn split_facilities(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .map(str::to_string)
        .collect()
}

// ── UPDATE ────────────────────────────────────────────────────

fn parse_update(
    table: &ast::TableWithJoins,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(&table.relation)?;
    let id = extract_where_id(selection)?;

    let mut set: Vec<(String, &Expr)> = Vec::with_capacity(assignments.len());
    for a in assignments {
        let col = match &a.target {
            ast::AssignmentTarget::ColumnName(name) => object_name_last(name),
            _ => None,
        }
        .ok_or_else(|| SqlError::Unsupported("tuple assignment".into()))?;
        set.push((col, &a.value));
    }
    if set.is_empty() {
        return Err(SqlError::Parse("UPDATE without SET".into()));
    }

    match table.as_str() {
        "users" => {
            let mut update = UserUpdate::default();
            for (col, value) in set {
                match col.as_str() {
                    "suspended" => update.suspended = Some(parse_bool(value)?),
                    "locked" => update.locked = Some(parse_bool(value)?),
                    "password" => update.password = Some(parse_string(value)?),
                    "role" => {
                        let s = parse_string(value)?;
                        update.role = Some(Role::parse(&s).ok_or_else(|| SqlError::Parse(format!("bad role: {s}")))?);
                    }
                    _ => return Err(SqlError::UnknownColumn(col)),
                }
            }
            Ok(Command::UpdateUser { id, update })
        }
        "rooms" => {
            let mut update = RoomUpdate::default();
            for (col, value) in set {
                match col.as_str() {
                    "status" => {
                        let s = parse_string(value)?;
                        update.status =
                            Some(RoomStatus::parse(&s).ok_or_else(|| SqlError::Parse(format!("bad status: {s}")))?);
                    }
                    "name" | "display_name" => update.display_name = Some(parse_string(value)?),
                    "location" => update.location = Some(parse_string(value)?),
                    "capacity" => update.capacity = Some(parse_u32(value)?),
                    "facilities" => update.facilities = Some(split_facilities(&parse_string(value)?)),
                    _ => return Err(SqlError::UnknownColumn(col)),
                }
            }
            Ok(Command::UpdateRoom { id, update })
        }
        "bookings" => {
            let (mut start, mut end) = (None, None);
            for (col, value) in set {
                match col.as_str() {
                    "start" => start = Some(parse_i64_expr(value)?),
                    "end" => end = Some(parse_i64_expr(value)?),
                    _ => return Err(SqlError::UnknownColumn(col)),
                }
            }
            Ok(Command::UpdateBooking {
                id,
                start: start.ok_or(SqlError::MissingColumn("bookings", "start"))?,
                end: end.ok_or(SqlError::MissingColumn("bookings", "end"))?,
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
        "users" => Ok(Command::DeleteUser { id }),
        "rooms" => Ok(Command::DeleteRoom { id }),
        "bookings" => Ok(Command::DeleteBooking { id }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── SELECT ────────────────────────────────────────────────────

/// Column comparisons pulled out of a conjunctive WHERE clause.
#[derive(Default)]
struct Filters {
    eq: Vec<(String, Expr)>,
    gte: Vec<(String, Expr)>,
    lte: Vec<(String, Expr)>,
}

impl Filters {
    fn eq(&self, col: &str) -> Option<&Expr> {
        self.eq.iter().find(|(c, _)| c == col).map(|(_, e)| e)
    }

    fn gte(&self, col: &str) -> Option<&Expr> {
        self.gte.iter().find(|(c, _)| c == col).map(|(_, e)| e)
    }

    fn lte(&self, col: &str) -> Option<&Expr> {
        self.lte.iter().find(|(c, _)| c == col).map(|(_, e)| e)
    }
}

fn collect_filters(expr: &Expr, out: &mut Filters) -> Result<(), SqlError> {
    match expr {
        Expr::Nested(inner) => collect_filters(inner, out),
        Expr::BinaryOp { left, op, right } => {
            if *op == ast::BinaryOperator::And {
                collect_filters(left, out)?;
                return collect_filters(right, out);
            }
            let col = expr_column_name(left).ok_or_else(|| SqlError::Unsupported(format!("{expr}")))?;
            let rhs = (**right).clone();
            match op {
                ast::BinaryOperator::Eq => out.eq.push((col, rhs)),
                ast::BinaryOperator::GtEq => out.gte.push((col, rhs)),
                ast::BinaryOperator::LtEq => out.lte.push((col, rhs)),
                _ => return Err(SqlError::Unsupported(format!("operator {op}"))),
            }
            Ok(())
        }
        _ => Err(SqlError::Unsupported(format!("{expr}"))),
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

    let mut filters = Filters::default();
    if let Some(selection) = &select.selection {
        collect_filters(selection, &mut filters)?;
    }

    match table.as_str() {
        "bookings" => Ok(Command::SelectBookings {
            room_id: filters.eq("room_id").map(parse_ulid_expr).transpose()?,
            user_id: filters.eq("user_id").map(parse_ulid_expr).transpose()?,
            start: filters.gte("start").map(parse_i64_expr).transpose()?,
            end: filters.lte("end").map(parse_i64_expr).transpose()?,
        }),
        "rooms" => {
            let mut filter = RoomFilter {
                code: filters.eq("code").map(parse_string).transpose()?,
                min_capacity: filters.gte("capacity").map(parse_u32).transpose()?,
                max_capacity: filters.lte("capacity").map(parse_u32).transpose()?,
                location: filters.eq("location").map(parse_string).transpose()?,
                ..RoomFilter::default()
            };
            for (col, value) in &filters.eq {
                match col.as_str() {
                    "facility" => filter.facilities.push(parse_string(value)?),
                    "status" => {
                        let s = parse_string(value)?;
                        if RoomStatus::parse(&s) != Some(RoomStatus::Available) {
                            return Err(SqlError::Unsupported(format!("status filter {s}")));
                        }
                        filter.only_available = true;
                    }
                    _ => {}
                }
            }
            Ok(Command::SelectRooms { filter })
        }
        "users" => {
            let role = filters
                .eq("role")
                .map(|e| {
                    let s = parse_string(e)?;
                    Role::parse(&s).ok_or_else(|| SqlError::Parse(format!("bad role: {s}")))
                })
                .transpose()?;
            let status = filters
                .eq("status")
                .map(|e| {
                    let s = parse_string(e)?;
                    UserStatus::parse(&s).ok_or_else(|| SqlError::Parse(format!("bad status: {s}")))
                })
                .transpose()?;
            Ok(Command::SelectUsers {
                filter: UserFilter {
                    role,
                    status,
                    username: filters.eq("username").map(parse_string).transpose()?,
                },
            })
        }
        "schedule" => Ok(Command::SelectSchedule {
            room_id: parse_ulid_expr(filters.eq("room_id").ok_or(SqlError::MissingFilter("room_id"))?)?,
            day: parse_i64_expr(filters.eq("day").ok_or(SqlError::MissingFilter("day"))?)?,
        }),
        "frequent_bookers" => Ok(Command::SelectFrequentBookers {
            day: parse_i64_expr(filters.eq("day").ok_or(SqlError::MissingFilter("day"))?)?,
            ascending: order_ascending(query),
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// `ORDER BY <anything> ASC`; descending otherwise.
fn order_ascending(query: &ast::Query) -> bool {
    let Some(order_by) = &query.order_by else {
        return false;
    };
    match &order_by.kind {
        OrderByKind::Expressions(exprs) => exprs.first().is_some_and(|e| e.options.asc == Some(true)),
        _ => false,
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

fn extract_insert_values(insert: &ast::Insert) -> Result<Vec<Expr>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => match values.rows.as_slice() {
            [] => Err(SqlError::Parse("empty VALUES".into())),
            [row] => Ok(row.clone()),
            _ => Err(SqlError::Unsupported("multi-row INSERT".into())),
        },
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn extract_where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    let sel = selection.as_ref().ok_or(SqlError::MissingFilter("id"))?;
    match sel {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } => {
            if expr_column_name(left).as_deref() == Some("id") {
                parse_ulid_expr(right)
            } else {
                Err(SqlError::MissingFilter("id"))
            }
        }
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

fn parse_i64_expr(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad i64: {e}"))),
            Value::SingleQuotedString(s) => s
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

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64_expr(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u32 range")))
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    parse_string_or_null(expr)?.ok_or_else(|| SqlError::Parse("unexpected NULL".into()))
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        Some(Value::SingleQuotedString(s)) => Ok(Some(s.clone())),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
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

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    UnknownColumn(String),
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
            SqlError::UnknownColumn(c) => write!(f, "unknown column: {c}"),
            SqlError::MissingColumn(t, c) => write!(f, "{t}: missing column {c}"),
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}
