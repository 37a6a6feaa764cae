//! Per-school composite ratings.
//!
//! [`compute_ratings`] re-pivots the long fact tables into one wide row per active school and
//! scores each school on the seven [`METRICS`]. The pipeline calls it on the tables it just
//! persisted; it can equally run on tables read back with [`load_inputs`].

mod metrics;

use std::path::Path;

use log::{info, warn};
use serde::Serialize;

use crate::dictionary::{DomainArea, DomainDictionary};
use crate::error::{CensusError, CensusResult};
use crate::execution::ExecutionEngine;
use crate::persist;
use crate::processing::registry::read_registry_table;
use crate::processing::reshape::{read_facts, FactRecord, WideTable};
use crate::types::DataSet;

pub use metrics::{
    round2, CompiledMetric, DenominatorGuard, MetricDefinition, Ratio, RatingDomain, SkipReason,
    ZeroDenominator, METRICS,
};

/// Header of the persisted rating table.
pub const RATING_HEADERS: [&str; 9] = [
    "id_escola",
    "ano",
    "accessibility_rating",
    "recreation_rating",
    "wellbeing_rating",
    "human_support_rating",
    "management_rating",
    "age_grade_distortion_rating",
    "pedagogical_rating",
];

const SCHOOL_ID_COLUMN: &str = "id_escola";
const STATUS_COLUMN: &str = "funcionamento";

/// Rating-stage knobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RatingOptions {
    /// Only facts of this year are rated.
    pub census_year: i64,
    /// `funcionamento` value of an operating school.
    pub active_code: i64,
    pub zero_denominator: ZeroDenominator,
    /// Number of ratings logged after the run.
    pub preview_rows: usize,
}

impl Default for RatingOptions {
    fn default() -> Self {
        Self {
            census_year: 2024,
            active_code: 1,
            zero_denominator: ZeroDenominator::Zero,
            preview_rows: 5,
        }
    }
}

/// Everything the rating stage reads.
#[derive(Debug, Clone, Copy)]
pub struct RatingInputs<'a> {
    pub infrastructure_facts: &'a [FactRecord],
    pub infrastructure_dictionary: &'a DomainDictionary,
    pub enrollment_facts: &'a [FactRecord],
    pub enrollment_dictionary: &'a DomainDictionary,
    /// Registry table; needs `id_escola` and `funcionamento`.
    pub registry: &'a DataSet,
}

/// Owned rating inputs, as read back from persisted tables.
#[derive(Debug, Clone)]
pub struct LoadedInputs {
    pub infrastructure_facts: Vec<FactRecord>,
    pub infrastructure_dictionary: DomainDictionary,
    pub enrollment_facts: Vec<FactRecord>,
    pub enrollment_dictionary: DomainDictionary,
    pub registry: DataSet,
}

impl LoadedInputs {
    pub fn as_inputs(&self) -> RatingInputs<'_> {
        RatingInputs {
            infrastructure_facts: &self.infrastructure_facts,
            infrastructure_dictionary: &self.infrastructure_dictionary,
            enrollment_facts: &self.enrollment_facts,
            enrollment_dictionary: &self.enrollment_dictionary,
            registry: &self.registry,
        }
    }
}

/// Paths of the persisted tables the rating stage reads.
#[derive(Debug, Clone, Copy)]
pub struct InputPaths<'a> {
    pub infrastructure_dictionary: &'a Path,
    pub infrastructure_facts: &'a Path,
    pub enrollment_dictionary: &'a Path,
    pub enrollment_facts: &'a Path,
    pub registry: &'a Path,
}

/// Read the persisted dictionaries, fact tables and registry.
pub fn load_inputs(paths: InputPaths<'_>) -> CensusResult<LoadedInputs> {
    Ok(LoadedInputs {
        infrastructure_dictionary: DomainDictionary::read_csv(
            paths.infrastructure_dictionary,
            DomainArea::Infraestrutura,
        )?,
        infrastructure_facts: read_facts(paths.infrastructure_facts)?,
        enrollment_dictionary: DomainDictionary::read_csv(paths.enrollment_dictionary, DomainArea::Matricula)?,
        enrollment_facts: read_facts(paths.enrollment_facts)?,
        registry: read_registry_table(paths.registry)?,
    })
}

/// Scores of one school.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchoolRating {
    pub id_escola: i64,
    pub ano: i64,
    /// In [`METRICS`] order.
    pub scores: [f64; 7],
}

impl SchoolRating {
    pub fn score(&self, metric: &str) -> Option<f64> {
        METRICS
            .iter()
            .position(|m| m.name == metric)
            .map(|i| self.scores[i])
    }
}

/// A school left out of the ratings, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RatingDiagnostic {
    pub school_id: i64,
    pub metric: &'static str,
    pub reason: String,
}

/// Result of [`compute_ratings`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RatingReport {
    /// In active-school order.
    pub ratings: Vec<SchoolRating>,
    pub diagnostics: Vec<RatingDiagnostic>,
}

/// Ids of schools whose `funcionamento` equals `active_code`, duplicates collapsed, in table order.
pub fn active_schools(registry: &DataSet, active_code: i64) -> CensusResult<Vec<i64>> {
    let column = |name: &str| {
        registry
            .schema
            .index_of(name)
            .ok_or_else(|| CensusError::MissingColumn {
                column: name.to_string(),
                headers: registry.schema.field_names().map(str::to_string).collect(),
            })
    };
    let id_idx = column(SCHOOL_ID_COLUMN)?;
    let status_idx = column(STATUS_COLUMN)?;

    let mut seen = std::collections::HashSet::new();
    Ok(registry
        .rows
        .iter()
        .filter(|row| row[status_idx].as_i64() == Some(active_code))
        .filter_map(|row| row[id_idx].as_i64())
        .filter(|id| seen.insert(*id))
        .collect())
}

/// Rate every active school of `options.census_year`.
///
/// A metric column missing from its domain is a [`CensusError::Lookup`], raised before any school
/// is scored. Schools that cannot be scored are left out of `ratings` and listed in `diagnostics`.
pub fn compute_ratings(
    inputs: RatingInputs<'_>,
    options: &RatingOptions,
    engine: &ExecutionEngine,
) -> CensusResult<RatingReport> {
    let schools = active_schools(inputs.registry, options.active_code)?;
    let year = options.census_year;

    let infrastructure = WideTable::pivot(
        inputs.infrastructure_facts.iter().filter(|f| f.ano == year),
        inputs.infrastructure_dictionary,
        &schools,
    )?;
    let enrollment = WideTable::pivot(
        inputs.enrollment_facts.iter().filter(|f| f.ano == year),
        inputs.enrollment_dictionary,
        &schools,
    )?;
    debug_assert_eq!(infrastructure.schools(), schools.as_slice());
    debug_assert_eq!(enrollment.schools(), schools.as_slice());

    let compiled = METRICS
        .iter()
        .map(|&m| {
            let table = match m.domain {
                RatingDomain::Infrastructure => &infrastructure,
                RatingDomain::Enrollment => &enrollment,
            };
            CompiledMetric::compile(m, table)
        })
        .collect::<CensusResult<Vec<_>>>()?;

    let outcomes = engine.map_parallel("rating", &schools, |&school_id| {
        rate_school(school_id, year, &compiled, &infrastructure, &enrollment, options.zero_denominator)
    });

    let mut report = RatingReport::default();
    for outcome in outcomes {
        match outcome {
            Ok(rating) => report.ratings.push(rating),
            Err(diagnostic) => {
                warn!(
                    "school {} not rated: {} ({})",
                    diagnostic.school_id, diagnostic.reason, diagnostic.metric
                );
                report.diagnostics.push(diagnostic);
            }
        }
    }
    info!(
        "rated {} of {} active schools for {year}",
        report.ratings.len(),
        schools.len()
    );
    log_preview(&report.ratings, options.preview_rows);
    Ok(report)
}

fn rate_school(
    school_id: i64,
    year: i64,
    compiled: &[CompiledMetric],
    infrastructure: &WideTable,
    enrollment: &WideTable,
    policy: ZeroDenominator,
) -> Result<SchoolRating, RatingDiagnostic> {
    let mut scores = [0.0; 7];
    for (slot, metric) in scores.iter_mut().zip(compiled) {
        let table = match metric.definition.domain {
            RatingDomain::Infrastructure => infrastructure,
            RatingDomain::Enrollment => enrollment,
        };
        let diagnostic = |reason: String| RatingDiagnostic {
            school_id,
            metric: metric.definition.name,
            reason,
        };
        let row = table
            .row(school_id)
            .ok_or_else(|| diagnostic("school missing from wide table".to_string()))?;
        *slot = metric
            .evaluate(row, policy)
            .map_err(|reason| diagnostic(reason.to_string()))?;
    }
    Ok(SchoolRating {
        id_escola: school_id,
        ano: year,
        scores,
    })
}

fn log_preview(ratings: &[SchoolRating], n: usize) {
    if n == 0 || ratings.is_empty() {
        return;
    }
    info!("{}", RATING_HEADERS.join(" | "));
    for r in ratings.iter().take(n) {
        let scores: Vec<String> = r.scores.iter().map(|s| format!("{s:.2}")).collect();
        info!("{} | {} | {}", r.id_escola, r.ano, scores.join(" | "));
    }
}

/// Write the rating table (see [`RATING_HEADERS`]).
pub fn write_ratings(ratings: &[SchoolRating], path: impl AsRef<Path>) -> CensusResult<()> {
    let mut wtr = persist::create_csv_writer(path.as_ref(), &RATING_HEADERS)?;
    for r in ratings {
        let mut record = Vec::with_capacity(RATING_HEADERS.len());
        record.push(r.id_escola.to_string());
        record.push(r.ano.to_string());
        record.extend(r.scores.iter().map(f64::to_string));
        wtr.write_record(&record)?;
    }
    wtr.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{active_schools, compute_ratings, RatingInputs, RatingOptions, ZeroDenominator, METRICS};
    use crate::dictionary::{AttributeDescriptor, DeclaredType, DomainArea, DomainDictionary};
    use crate::error::CensusError;
    use crate::execution::{ExecutionEngine, ExecutionOptions};
    use crate::processing::reshape::FactRecord;
    use crate::types::{DataSet, DataType, Field, Schema, Value};

    fn engine() -> ExecutionEngine {
        ExecutionEngine::new(ExecutionOptions {
            num_threads: Some(2),
            chunk_size: 2,
            max_in_flight_chunks: 2,
        })
        .unwrap()
    }

    fn domain(area: DomainArea) -> DomainDictionary {
        let mut names: Vec<&str> = Vec::new();
        for m in METRICS.iter().filter(|m| m.domain.area() == area) {
            for c in m.columns() {
                if !names.contains(&c) {
                    names.push(c);
                }
            }
        }
        let descriptors = names
            .into_iter()
            .map(|n| {
                if n.starts_with("IN_") {
                    AttributeDescriptor::new(n, DeclaredType::Bool, Some(1), area.clone())
                } else {
                    AttributeDescriptor::new(n, DeclaredType::Num, Some(4), area.clone())
                }
            })
            .collect();
        DomainDictionary::assign_ids(area, descriptors)
    }

    fn registry(rows: &[(&str, &str)]) -> DataSet {
        DataSet::new(
            Schema::new(vec![
                Field::new("id_escola", DataType::Text),
                Field::new("funcionamento", DataType::Text),
            ]),
            rows.iter()
                .map(|(id, status)| vec![Value::Text(id.to_string()), Value::Text(status.to_string())])
                .collect(),
        )
    }

    fn fact(domain: &DomainDictionary, ano: i64, school: i64, name: &str, v: i64) -> FactRecord {
        let attr = domain.by_name(name).unwrap();
        FactRecord {
            id: 0,
            ano,
            id_escola: school,
            id_atributo: attr.id,
            tipo_atributo: attr.descriptor.declared_type,
            valor: Value::Int64(v),
        }
    }

    #[test]
    fn only_active_schools_are_rated_in_registry_order() {
        let infra = domain(DomainArea::Infraestrutura);
        let enroll = domain(DomainArea::Matricula);
        let reg = registry(&[("30", "1"), ("10", "2"), ("20", "1"), ("30", "1")]);
        assert_eq!(active_schools(&reg, 1).unwrap(), vec![30, 20]);

        let infra_facts = vec![fact(&infra, 2024, 20, "IN_COZINHA", 1)];
        let report = compute_ratings(
            RatingInputs {
                infrastructure_facts: &infra_facts,
                infrastructure_dictionary: &infra,
                enrollment_facts: &[],
                enrollment_dictionary: &enroll,
                registry: &reg,
            },
            &RatingOptions::default(),
            &engine(),
        )
        .unwrap();

        let ids: Vec<_> = report.ratings.iter().map(|r| r.id_escola).collect();
        assert_eq!(ids, vec![30, 20]);
        assert_eq!(report.ratings[1].score("wellbeing"), Some(0.14));
        assert_eq!(report.ratings[0].scores, [0.0; 7]);
        assert!(report.diagnostics.is_empty());
    }

    #[test]
    fn facts_of_other_years_are_ignored() {
        let infra = domain(DomainArea::Infraestrutura);
        let enroll = domain(DomainArea::Matricula);
        let reg = registry(&[("1", "1")]);
        let infra_facts = vec![
            fact(&infra, 2023, 1, "IN_BANDA_LARGA", 1),
            fact(&infra, 2024, 1, "IN_INTERNET_ALUNOS", 1),
        ];
        let report = compute_ratings(
            RatingInputs {
                infrastructure_facts: &infra_facts,
                infrastructure_dictionary: &infra,
                enrollment_facts: &[],
                enrollment_dictionary: &enroll,
                registry: &reg,
            },
            &RatingOptions::default(),
            &engine(),
        )
        .unwrap();
        assert_eq!(report.ratings[0].score("pedagogical"), Some(0.17));
    }

    #[test]
    fn skip_policy_reports_a_diagnostic() {
        let infra = domain(DomainArea::Infraestrutura);
        let enroll = domain(DomainArea::Matricula);
        let reg = registry(&[("1", "1"), ("2", "1")]);
        let infra_facts = vec![
            fact(&infra, 2024, 1, "QT_SALAS_UTILIZA_CLIMATIZADAS", 3),
            fact(&infra, 2024, 2, "QT_SALAS_UTILIZADAS", 4),
        ];
        let enroll_facts = vec![fact(&enroll, 2024, 2, "QT_MAT_BAS_15_17", 10)];
        let options = RatingOptions {
            zero_denominator: ZeroDenominator::Skip,
            ..RatingOptions::default()
        };
        let report = compute_ratings(
            RatingInputs {
                infrastructure_facts: &infra_facts,
                infrastructure_dictionary: &infra,
                enrollment_facts: &enroll_facts,
                enrollment_dictionary: &enroll,
                registry: &reg,
            },
            &options,
            &engine(),
        )
        .unwrap();

        assert_eq!(report.ratings.len(), 1);
        assert_eq!(report.ratings[0].id_escola, 2);
        assert_eq!(report.diagnostics.len(), 1);
        assert_eq!(report.diagnostics[0].school_id, 1);
        assert_eq!(report.diagnostics[0].metric, "recreation");
    }

    #[test]
    fn missing_metric_column_is_fatal() {
        let infra = DomainDictionary::assign_ids(
            DomainArea::Infraestrutura,
            vec![AttributeDescriptor::new(
                "IN_PISCINA",
                DeclaredType::Bool,
                Some(1),
                DomainArea::Infraestrutura,
            )],
        );
        let enroll = domain(DomainArea::Matricula);
        let reg = registry(&[("1", "1")]);
        let err = compute_ratings(
            RatingInputs {
                infrastructure_facts: &[],
                infrastructure_dictionary: &infra,
                enrollment_facts: &[],
                enrollment_dictionary: &enroll,
                registry: &reg,
            },
            &RatingOptions::default(),
            &engine(),
        )
        .unwrap_err();
        assert!(matches!(err, CensusError::Lookup { .. }));
        assert_eq!(err.exit_code(), 5);
    }

    #[test]
    fn registry_without_status_column_is_missing_column() {
        let reg = DataSet::new(Schema::new(vec![Field::new("id_escola", DataType::Text)]), vec![]);
        let err = active_schools(&reg, 1).unwrap_err();
        assert!(matches!(err, CensusError::MissingColumn { ref column, .. } if column == "funcionamento"));
    }
}
