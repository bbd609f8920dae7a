use sqlparser::ast::{self, Expr, ObjectNamePart, SetExpr, Statement, TableFactor, Value, ValueWithSpan};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;

use crate::limits::*;
use crate::model::*;

/// Read-only virtual tables served over the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewKind {
    Listings,
    ListingsByCity,
    PriceHistogram,
    PriceByCity,
    SurfaceVsPrice,
    CityMap,
    CityOverview,
    FilterOptions,
}

impl ViewKind {
    pub fn from_table(name: &str) -> Option<Self> {
        Some(match name {
            "listings" => ViewKind::Listings,
            "listings_by_city" => ViewKind::ListingsByCity,
            "price_histogram" => ViewKind::PriceHistogram,
            "price_by_city" => ViewKind::PriceByCity,
            "surface_vs_price" => ViewKind::SurfaceVsPrice,
            "city_map" => ViewKind::CityMap,
            "city_overview" => ViewKind::CityOverview,
            "filter_options" => ViewKind::FilterOptions,
            _ => return None,
        })
    }
}

/// Optional inclusive bounds; unset ends fall back to the session defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Bounds<T> {
    pub min: Option<T>,
    pub max: Option<T>,
}

impl<T: Copy + PartialOrd> Bounds<T> {
    fn exact(value: T) -> Self {
        Self {
            min: Some(value),
            max: Some(value),
        }
    }

    /// A defaulted end never crosses an explicit one; only two explicit
    /// bounds can form an inverted range.
    fn resolve(&self, default: ValueRange<T>) -> ValueRange<T> {
        match (self.min, self.max) {
            (Some(min), Some(max)) => ValueRange::new(min, max),
            (Some(min), None) => {
                let max = if min > default.max { min } else { default.max };
                ValueRange::new(min, max)
            }
            (None, Some(max)) => {
                let min = if max < default.min { max } else { default.min };
                ValueRange::new(min, max)
            }
            (None, None) => default,
        }
    }
}

/// A SELECT against one view, with the WHERE clause already decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewQuery {
    pub view: ViewKind,
    pub price: Bounds<f64>,
    pub rooms: Bounds<i64>,
    pub bathrooms: Bounds<i64>,
    pub city: Option<String>,
    pub amenities: Vec<String>,
    pub bins: Option<usize>,
}

impl ViewQuery {
    pub fn new(view: ViewKind) -> Self {
        Self {
            view,
            price: Bounds::default(),
            rooms: Bounds::default(),
            bathrooms: Bounds::default(),
            city: None,
            amenities: Vec::new(),
            bins: None,
        }
    }

    /// Overlay the explicit constraints on `defaults`.
    pub fn to_spec(&self, defaults: FilterSpec) -> FilterSpec {
        FilterSpec {
            price_range: self.price.resolve(defaults.price_range),
            room_range: self.rooms.resolve(defaults.room_range),
            bathroom_range: self.bathrooms.resolve(defaults.bathroom_range),
            city_name: self.city.clone().or(defaults.city_name),
            amenity_names: if self.amenities.is_empty() {
                defaults.amenity_names
            } else {
                self.amenities.clone()
            },
        }
    }

    pub fn bin_count(&self) -> usize {
        self.bins.unwrap_or(DEFAULT_HISTOGRAM_BINS)
    }
}

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    Select(ViewQuery),
    /// Reload the session's snapshot from the data source.
    Refresh,
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let trimmed = sql.trim().trim_end_matches(';').trim();
    if trimmed.eq_ignore_ascii_case("REFRESH") {
        return Ok(Command::Refresh);
    }

    let query = parse_query(sql)?;
    let (view, select) = select_view(&query)?;
    let mut q = ViewQuery::new(view);
    if let Some(selection) = &select.selection {
        extract_filters(selection, &mut q)?;
    }
    Ok(Command::Select(q))
}

/// The view a statement reads from, without evaluating its WHERE clause.
/// Works on statements that still carry `$n` placeholders.
pub fn target_view(sql: &str) -> Result<ViewKind, SqlError> {
    let query = parse_query(sql)?;
    select_view(&query).map(|(view, _)| view)
}

fn parse_query(sql: &str) -> Result<Box<ast::Query>, SqlError> {
    let dialect = PostgreSqlDialect {};
    let mut stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }
    match stmts.swap_remove(0) {
        Statement::Query(query) => Ok(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn select_view(query: &ast::Query) -> Result<(ViewKind, &ast::Select), SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s.as_ref(),
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };
    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;
    let view = ViewKind::from_table(&table).ok_or(SqlError::UnknownView(table))?;
    Ok((view, select))
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Column {
    Price,
    Rooms,
    Bathrooms,
    City,
    Amenity,
    Bins,
}

fn column(expr: &Expr) -> Result<Column, SqlError> {
    let name = expr_column_name(expr)
        .ok_or_else(|| SqlError::Unsupported(format!("expected column, got {expr}")))?;
    Ok(match name.as_str() {
        "price" => Column::Price,
        "nb_rooms" | "rooms" => Column::Rooms,
        "num_bathrooms" | "bathrooms" => Column::Bathrooms,
        "city" | "city_name" => Column::City,
        "amenity" | "amenities" => Column::Amenity,
        "bins" => Column::Bins,
        _ => return Err(SqlError::UnknownColumn(name)),
    })
}

fn extract_filters(expr: &Expr, q: &mut ViewQuery) -> Result<(), SqlError> {
    match expr {
        Expr::Nested(inner) => extract_filters(inner, q),
        Expr::BinaryOp { left, op, right } => match op {
            ast::BinaryOperator::And => {
                extract_filters(left, q)?;
                extract_filters(right, q)
            }
            ast::BinaryOperator::Eq => apply_eq(column(left)?, right, q),
            ast::BinaryOperator::GtEq => apply_bound(column(left)?, right, q, true),
            ast::BinaryOperator::LtEq => apply_bound(column(left)?, right, q, false),
            other => Err(SqlError::Unsupported(format!("operator {other}"))),
        },
        Expr::Between {
            expr,
            negated,
            low,
            high,
        } => {
            if *negated {
                return Err(SqlError::Unsupported("NOT BETWEEN".into()));
            }
            let col = column(expr)?;
            apply_bound(col, low, q, true)?;
            apply_bound(col, high, q, false)
        }
        Expr::InList {
            expr,
            list,
            negated,
        } => {
            if *negated {
                return Err(SqlError::Unsupported("NOT IN".into()));
            }
            match column(expr)? {
                Column::Amenity => {
                    for item in list {
                        push_amenity(q, parse_string_expr(item)?)?;
                    }
                    Ok(())
                }
                other => Err(SqlError::Unsupported(format!("IN on {other:?}"))),
            }
        }
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn apply_eq(col: Column, value: &Expr, q: &mut ViewQuery) -> Result<(), SqlError> {
    match col {
        Column::Price => q.price = Bounds::exact(parse_f64_expr(value)?),
        Column::Rooms => q.rooms = Bounds::exact(parse_i64_expr(value)?),
        Column::Bathrooms => q.bathrooms = Bounds::exact(parse_i64_expr(value)?),
        Column::City => q.city = Some(parse_string_expr(value)?),
        Column::Amenity => push_amenity(q, parse_string_expr(value)?)?,
        Column::Bins => {
            let bins = parse_i64_expr(value)?;
            let bins = usize::try_from(bins)
                .map_err(|_| SqlError::Parse(format!("bins must be non-negative, got {bins}")))?;
            if bins > MAX_HISTOGRAM_BINS {
                return Err(SqlError::LimitExceeded("too many histogram bins"));
            }
            q.bins = Some(bins);
        }
    }
    Ok(())
}

/// `lower = true` sets the minimum, otherwise the maximum.
fn apply_bound(col: Column, value: &Expr, q: &mut ViewQuery, lower: bool) -> Result<(), SqlError> {
    fn set<T>(bounds: &mut Bounds<T>, v: T, lower: bool) {
        if lower {
            bounds.min = Some(v);
        } else {
            bounds.max = Some(v);
        }
    }
    match col {
        Column::Price => set(&mut q.price, parse_f64_expr(value)?, lower),
        Column::Rooms => set(&mut q.rooms, parse_i64_expr(value)?, lower),
        Column::Bathrooms => set(&mut q.bathrooms, parse_i64_expr(value)?, lower),
        other => return Err(SqlError::Unsupported(format!("range on {other:?}"))),
    }
    Ok(())
}

fn push_amenity(q: &mut ViewQuery, name: String) -> Result<(), SqlError> {
    if q.amenities.len() >= MAX_AMENITY_FILTERS {
        return Err(SqlError::LimitExceeded("too many amenities"));
    }
    if !q.amenities.contains(&name) {
        q.amenities.push(name);
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

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
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

fn parse_string_expr(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => Ok(s.clone()),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_f64_expr(expr: &Expr) -> Result<f64, SqlError> {
    if let Some(value) = extract_value(expr) {
        let v: f64 = match value {
            Value::Number(s, _) | Value::SingleQuotedString(s) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad number {s}: {e}")))?,
            _ => return Err(SqlError::Parse(format!("expected number, got {value}"))),
        };
        if v.is_nan() {
            return Err(SqlError::Parse("NaN is not a valid bound".into()));
        }
        Ok(v)
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_f64_expr(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr}")))
    }
}

fn parse_i64_expr(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) | Value::SingleQuotedString(s) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad integer {s}: {e}"))),
            _ => Err(SqlError::Parse(format!("expected integer, got {value}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_i64_expr(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr}")))
    }
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownView(String),
    UnknownColumn(String),
    LimitExceeded(&'static str),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownView(t) => write!(f, "unknown view: {t}"),
            SqlError::UnknownColumn(c) => write!(f, "unknown filter column: {c}"),
            SqlError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
        }
    }
}

impl std::error::Error for SqlError {}
