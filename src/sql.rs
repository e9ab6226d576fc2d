use sqlparser::ast::{
    self, AssignmentTarget, BinaryOperator, Expr, FromTable, ObjectNamePart, SetExpr, Statement,
    TableFactor, TableObject, UnaryOperator, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

/// Parsed command from SQL input. Dates and times stay as text here; the
/// wire layer turns them into domain values so bad input gets the domain's
/// error codes.
#[derive(Debug, PartialEq)]
pub enum Command {
    SelectAvailability {
        date: String,
        available_only: bool,
    },
    SelectBookings {
        filter: BookingFilter,
    },
    InsertBooking {
        values: BookingValues,
    },
    UpdateBookingStatus {
        id: Ulid,
        status: String,
    },
    CancelBooking {
        target: CancelFilter,
    },
}

#[derive(Debug, PartialEq)]
pub enum BookingFilter {
    Id(Ulid),
    OnDate(String),
    Between { from: String, to: String },
}

#[derive(Debug, PartialEq)]
pub enum CancelFilter {
    Id(Ulid),
    ClientOnDate { client_name: String, date: String },
}

/// Column values of an `INSERT INTO bookings`.
#[derive(Debug, Default, PartialEq)]
pub struct BookingValues {
    pub client_name: String,
    pub client_phone: Option<String>,
    pub date: String,
    pub start_time: String,
    pub vehicle_type: String,
    pub vehicle_plate: Option<String>,
    pub service_type: String,
    pub extras: Vec<String>,
    pub price_cents: i64,
    pub status: Option<String>,
    pub notes: Option<String>,
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    let Some(stmt) = stmts.first() else {
        return Err(SqlError::Empty);
    };

    match stmt {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(&table.relation, assignments, selection.as_ref()),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

/// Row shape a statement produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultTable {
    Availability,
    Bookings,
}

/// Which table a statement reads or writes, decided from the AST alone.
/// Values are not inspected, so `$N` placeholders are fine here.
pub fn result_table(sql: &str) -> Result<ResultTable, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    let Some(stmt) = stmts.first() else {
        return Err(SqlError::Empty);
    };

    let table = match stmt {
        Statement::Insert(insert) => insert_table_name(insert)?,
        Statement::Delete(delete) => delete_table_name(delete)?,
        Statement::Update { table, .. } => table_factor_name(&table.relation)?,
        Statement::Query(query) => match query.body.as_ref() {
            SetExpr::Select(select) => match select.from.first() {
                Some(from) => table_factor_name(&from.relation)?,
                None => return Err(SqlError::Parse("SELECT without FROM".into())),
            },
            _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
        },
        other => return Err(SqlError::Unsupported(format!("{other}"))),
    };
    let is_select = matches!(stmt, Statement::Query(_));
    match table.as_str() {
        "availability" if is_select => Ok(ResultTable::Availability),
        "bookings" => Ok(ResultTable::Bookings),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    if table != "bookings" {
        return Err(SqlError::UnknownTable(table));
    }
    if insert.columns.is_empty() {
        return Err(SqlError::Parse("INSERT INTO bookings needs a column list".into()));
    }
    let row = single_values_row(insert)?;
    if row.len() != insert.columns.len() {
        return Err(SqlError::WrongArity("bookings", insert.columns.len(), row.len()));
    }

    let mut values = BookingValues::default();
    let (mut has_name, mut has_date, mut has_start, mut has_price) = (false, false, false, false);
    for (column, expr) in insert.columns.iter().zip(row) {
        match column.value.to_lowercase().as_str() {
            "client_name" => {
                values.client_name = parse_text(expr)?.unwrap_or_default();
                has_name = true;
            }
            "client_phone" => values.client_phone = parse_text(expr)?,
            "date" => {
                values.date = parse_text(expr)?.ok_or(SqlError::MissingColumn("date"))?;
                has_date = true;
            }
            "start_time" => {
                values.start_time =
                    parse_text(expr)?.ok_or(SqlError::MissingColumn("start_time"))?;
                has_start = true;
            }
            "vehicle_type" => values.vehicle_type = parse_text(expr)?.unwrap_or_default(),
            "vehicle_plate" => values.vehicle_plate = parse_text(expr)?,
            "service_type" => values.service_type = parse_text(expr)?.unwrap_or_default(),
            "extras" => values.extras = split_extras(parse_text(expr)?.as_deref()),
            "price" => {
                values.price_cents = parse_price_expr(expr)?;
                has_price = true;
            }
            "status" => values.status = parse_text(expr)?,
            "notes" => values.notes = parse_text(expr)?,
            other => return Err(SqlError::UnknownColumn(other.to_string())),
        }
    }
    for (present, column) in [
        (has_name, "client_name"),
        (has_date, "date"),
        (has_start, "start_time"),
        (has_price, "price"),
    ] {
        if !present {
            return Err(SqlError::MissingColumn(column));
        }
    }
    Ok(Command::InsertBooking { values })
}

fn parse_update(
    relation: &TableFactor,
    assignments: &[ast::Assignment],
    selection: Option<&Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(relation)?;
    if table != "bookings" {
        return Err(SqlError::UnknownTable(table));
    }
    let mut status = None;
    for assignment in assignments {
        let column = match &assignment.target {
            AssignmentTarget::ColumnName(name) => object_name_last(name),
            _ => None,
        };
        match column.as_deref() {
            Some("status") => status = parse_text(&assignment.value)?,
            Some(other) => return Err(SqlError::Unsupported(format!("SET {other}"))),
            None => return Err(SqlError::Unsupported("tuple assignment".into())),
        }
    }
    let status = status.ok_or(SqlError::MissingColumn("status"))?;

    let filters = conjuncts(selection)?;
    let id = find_eq(&filters, "id").ok_or(SqlError::MissingFilter("id"))?;
    Ok(Command::UpdateBookingStatus {
        id: parse_ulid_expr(id)?,
        status,
    })
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    if table != "bookings" {
        return Err(SqlError::UnknownTable(table));
    }
    let filters = conjuncts(delete.selection.as_ref())?;
    if let Some(id) = find_eq(&filters, "id") {
        return Ok(Command::CancelBooking {
            target: CancelFilter::Id(parse_ulid_expr(id)?),
        });
    }
    let client_name = find_eq(&filters, "client_name").ok_or(SqlError::MissingFilter("id"))?;
    let date = find_eq(&filters, "date").ok_or(SqlError::MissingFilter("date"))?;
    Ok(Command::CancelBooking {
        target: CancelFilter::ClientOnDate {
            client_name: require_text(client_name, "client_name")?,
            date: require_text(date, "date")?,
        },
    })
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };
    let Some(from) = select.from.first() else {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    };
    let table = table_factor_name(&from.relation)?;
    let filters = conjuncts(select.selection.as_ref())?;

    match table.as_str() {
        "availability" => {
            let date = find_eq(&filters, "date").ok_or(SqlError::MissingFilter("date"))?;
            let available_only = match find_eq(&filters, "available") {
                Some(expr) => parse_bool(expr)?,
                None => false,
            };
            Ok(Command::SelectAvailability {
                date: require_text(date, "date")?,
                available_only,
            })
        }
        "bookings" => {
            let filter = if let Some(id) = find_eq(&filters, "id") {
                BookingFilter::Id(parse_ulid_expr(id)?)
            } else if let Some(date) = find_eq(&filters, "date") {
                BookingFilter::OnDate(require_text(date, "date")?)
            } else {
                let from = find(&filters, "date", BinaryOperator::GtEq)
                    .ok_or(SqlError::MissingFilter("date"))?;
                let to = find(&filters, "date", BinaryOperator::LtEq)
                    .ok_or(SqlError::MissingFilter("date"))?;
                BookingFilter::Between {
                    from: require_text(from, "date")?,
                    to: require_text(to, "date")?,
                }
            };
            Ok(Command::SelectBookings { filter })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── WHERE clauses ─────────────────────────────────────────────

/// One `column <op> value` comparison from an AND chain.
struct Filter<'a> {
    column: String,
    op: BinaryOperator,
    value: &'a Expr,
}

/// Flatten `a AND b AND c` into its comparisons. Anything else is rejected.
fn conjuncts(selection: Option<&Expr>) -> Result<Vec<Filter<'_>>, SqlError> {
    let mut out = Vec::new();
    if let Some(expr) = selection {
        collect_conjuncts(expr, &mut out)?;
    }
    Ok(out)
}

fn collect_conjuncts<'a>(expr: &'a Expr, out: &mut Vec<Filter<'a>>) -> Result<(), SqlError> {
    match expr {
        Expr::Nested(inner) => collect_conjuncts(inner, out),
        Expr::BinaryOp {
            left,
            op: BinaryOperator::And,
            right,
        } => {
            collect_conjuncts(left, out)?;
            collect_conjuncts(right, out)
        }
        Expr::BinaryOp { left, op, right } => {
            let column = expr_column_name(left)
                .ok_or_else(|| SqlError::Unsupported(format!("filter on {left}")))?;
            out.push(Filter {
                column,
                op: op.clone(),
                value: right,
            });
            Ok(())
        }
        other => Err(SqlError::Unsupported(format!("filter {other}"))),
    }
}

fn find<'a>(filters: &[Filter<'a>], column: &str, op: BinaryOperator) -> Option<&'a Expr> {
    filters
        .iter()
        .find(|f| f.column == column && f.op == op)
        .map(|f| f.value)
}

fn find_eq<'a>(filters: &[Filter<'a>], column: &str) -> Option<&'a Expr> {
    find(filters, column, BinaryOperator::Eq)
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

fn single_values_row(insert: &ast::Insert) -> Result<&[Expr], SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => match values.rows.as_slice() {
            [] => Err(SqlError::Parse("empty VALUES".into())),
            [row] => Ok(row.as_slice()),
            _ => Err(SqlError::Unsupported("multi-row INSERT".into())),
        },
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

/// Text or number literal as a string; NULL as `None`.
fn parse_text(expr: &Expr) -> Result<Option<String>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        Some(Value::SingleQuotedString(s) | Value::Number(s, _)) => Ok(Some(s.clone())),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn require_text(expr: &Expr, column: &'static str) -> Result<String, SqlError> {
    parse_text(expr)?.ok_or(SqlError::MissingFilter(column))
}

fn parse_ulid_expr(expr: &Expr) -> Result<Ulid, SqlError> {
    let text = parse_text(expr)?.ok_or(SqlError::MissingFilter("id"))?;
    Ulid::from_string(text.trim()).map_err(|e| SqlError::Parse(format!("bad booking id: {e}")))
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
            _ => Err(SqlError::Parse(format!("expected bool, got {value}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr}")))
    }
}

fn parse_price_expr(expr: &Expr) -> Result<i64, SqlError> {
    if let Expr::UnaryOp {
        op: UnaryOperator::Minus,
        expr,
    } = expr
    {
        return Ok(-parse_price_expr(expr)?);
    }
    match parse_text(expr)? {
        Some(text) => parse_price_cents(&text),
        None => Err(SqlError::MissingColumn("price")),
    }
}

/// `"25.5"` → 2550. At most two decimal places.
pub fn parse_price_cents(text: &str) -> Result<i64, SqlError> {
    let text = text.trim();
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let (whole, frac) = digits.split_once('.').unwrap_or((digits, ""));
    let bad = || SqlError::Parse(format!("bad price: {text:?}"));
    let all_digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
    if (whole.is_empty() && frac.is_empty()) || !all_digits(whole) || !all_digits(frac) {
        return Err(bad());
    }
    if frac.len() > 2 {
        return Err(bad());
    }
    let whole: i64 = if whole.is_empty() {
        0
    } else {
        whole.parse().map_err(|_| bad())?
    };
    let frac: i64 = match frac.len() {
        0 => 0,
        1 => frac.parse::<i64>().map_err(|_| bad())? * 10,
        _ => frac.parse().map_err(|_| bad())?,
    };
    let cents = whole
        .checked_mul(100)
        .and_then(|c| c.checked_add(frac))
        .ok_or_else(bad)?;
    Ok(if negative { -cents } else { cents })
}

fn split_extras(text: Option<&str>) -> Vec<String> {
    text.map(|t| {
        t.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    UnknownColumn(String),
    WrongArity(&'static str, usize, usize),
    MissingFilter(&'static str),
    MissingColumn(&'static str),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::UnknownColumn(c) => write!(f, "unknown column: {c}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
            SqlError::MissingColumn(col) => write!(f, "missing column: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}
