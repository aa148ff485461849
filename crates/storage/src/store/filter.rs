#![forbid(unsafe_code)]

use super::StoreError;
use cv_core::filter::{FilterSpec, MediaBucket};
use rusqlite::types::Value;

/// Where a `FilterSpec::ClusterKey` predicate looks for the key. Every other predicate reads the
/// parent record through the `p` alias.
#[derive(Clone, Copy, Debug)]
pub(super) enum ClusterScope {
    /// Parent rows: the key is matched through any association of the parent.
    ViaAssociation,
    /// Rows that carry their own cluster key column, e.g. `m.cluster_key`.
    Column(&'static str),
}

#[derive(Debug)]
pub(super) struct FilterSql {
    pub(super) clause: String,
    pub(super) params: Vec<Value>,
    first_index: usize,
}

impl FilterSql {
    fn bind(&mut self, value: Value) -> String {
        let index = self.first_index + self.params.len();
        self.params.push(value);
        format!("?{index}")
    }
}

/// Compiles `filter` into a boolean SQL expression whose placeholders start at `?{first_index}`.
pub(super) fn compile(
    filter: &FilterSpec,
    scope: ClusterScope,
    first_index: usize,
) -> Result<FilterSql, StoreError> {
    let mut out = FilterSql {
        clause: String::new(),
        params: Vec::new(),
        first_index,
    };
    let clause = compile_into(filter, scope, &mut out)?;
    out.clause = clause;
    Ok(out)
}

fn compile_into(
    filter: &FilterSpec,
    scope: ClusterScope,
    out: &mut FilterSql,
) -> Result<String, StoreError> {
    match filter {
        FilterSpec::All => Ok("1=1".to_string()),
        FilterSpec::DateRange { from_ms, to_ms } => {
            if let (Some(from), Some(to)) = (from_ms, to_ms)
                && from > to
            {
                return Err(StoreError::InvalidInput("date range is inverted"));
            }
            let mut parts = Vec::new();
            if let Some(from) = from_ms {
                let slot = out.bind(Value::Integer(*from));
                parts.push(format!("p.taken_at_ms >= {slot}"));
            }
            if let Some(to) = to_ms {
                let slot = out.bind(Value::Integer(*to));
                parts.push(format!("p.taken_at_ms < {slot}"));
            }
            if parts.is_empty() {
                return Ok("1=1".to_string());
            }
            Ok(format!("({})", parts.join(" AND ")))
        }
        FilterSpec::PathPrefix(prefix) => {
            if prefix.is_empty() {
                return Ok("1=1".to_string());
            }
            let slot = out.bind(Value::Text(prefix.clone()));
            Ok(format!("substr(p.path, 1, length({slot})) = {slot}"))
        }
        FilterSpec::ClusterKey(key) => {
            let slot = out.bind(Value::Text(key.as_str().to_string()));
            Ok(match scope {
                ClusterScope::ViaAssociation => format!(
                    "EXISTS (SELECT 1 FROM parent_associations fa \
                     WHERE fa.project = p.project AND fa.parent_id = p.parent_id \
                     AND fa.cluster_key = {slot})"
                ),
                ClusterScope::Column(column) => format!("{column} = {slot}"),
            })
        }
        FilterSpec::MediaBucket(MediaBucket::Duration { min_ms, max_ms }) => {
            if min_ms > max_ms {
                return Err(StoreError::InvalidInput("duration bucket is inverted"));
            }
            let min = out.bind(Value::Integer(*min_ms));
            let max = out.bind(Value::Integer(*max_ms));
            Ok(format!(
                "(p.media_kind = 'video' AND p.duration_ms BETWEEN {min} AND {max})"
            ))
        }
        FilterSpec::MediaBucket(MediaBucket::Resolution {
            min_pixels,
            max_pixels,
        }) => {
            if min_pixels > max_pixels {
                return Err(StoreError::InvalidInput("resolution bucket is inverted"));
            }
            let min = out.bind(Value::Integer(*min_pixels));
            let max = out.bind(Value::Integer(*max_pixels));
            Ok(format!(
                "(p.width IS NOT NULL AND p.height IS NOT NULL \
                 AND p.width * p.height BETWEEN {min} AND {max})"
            ))
        }
        FilterSpec::And(parts) => {
            if parts.is_empty() {
                return Ok("1=1".to_string());
            }
            let mut clauses = Vec::with_capacity(parts.len());
            for part in parts {
                clauses.push(compile_into(part, scope, out)?);
            }
            Ok(format!("({})", clauses.join(" AND ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cv_core::ids::ClusterKey;

    #[test]
    fn placeholders_continue_after_first_index() {
        let filter = FilterSpec::And(vec![
            FilterSpec::DateRange {
                from_ms: Some(10),
                to_ms: Some(20),
            },
            FilterSpec::PathPrefix("/photos/".to_string()),
        ]);
        let sql = compile(&filter, ClusterScope::ViaAssociation, 2).expect("compile");
        assert_eq!(
            sql.clause,
            "((p.taken_at_ms >= ?2 AND p.taken_at_ms < ?3) AND substr(p.path, 1, length(?4)) = ?4)"
        );
        assert_eq!(
            sql.params,
            vec![
                Value::Integer(10),
                Value::Integer(20),
                Value::Text("/photos/".to_string())
            ]
        );
    }

    #[test]
    fn cluster_key_follows_scope() {
        let key = ClusterKey::try_new("person_1").expect("key");
        let filter = FilterSpec::ClusterKey(key);
        let column = compile(&filter, ClusterScope::Column("m.cluster_key"), 2).expect("compile");
        assert_eq!(column.clause, "m.cluster_key = ?2");
        let via = compile(&filter, ClusterScope::ViaAssociation, 2).expect("compile");
        assert!(via.clause.starts_with("EXISTS (SELECT 1 FROM parent_associations fa"));
        assert!(via.clause.contains("fa.cluster_key = ?2"));
    }

    #[test]
    fn inverted_ranges_are_rejected() {
        let err = compile(
            &FilterSpec::DateRange {
                from_ms: Some(5),
                to_ms: Some(1),
            },
            ClusterScope::ViaAssociation,
            2,
        )
        .expect_err("inverted range");
        assert!(matches!(err, StoreError::InvalidInput("date range is inverted")));

        let err = compile(
            &FilterSpec::MediaBucket(MediaBucket::Resolution {
                min_pixels: 10,
                max_pixels: 1,
            }),
            ClusterScope::ViaAssociation,
            2,
        )
        .expect_err("inverted bucket");
        assert_eq!(err.code(), "INVALID_INPUT");
    }

    #[test]
    fn open_filters_compile_to_tautology() {
        for filter in [
            FilterSpec::All,
            FilterSpec::And(Vec::new()),
            FilterSpec::PathPrefix(String::new()),
            FilterSpec::DateRange {
                from_ms: None,
                to_ms: None,
            },
        ] {
            let sql = compile(&filter, ClusterScope::ViaAssociation, 2).expect("compile");
            assert_eq!(sql.clause, "1=1");
            assert!(sql.params.is_empty());
        }
    }
}
