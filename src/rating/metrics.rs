//! The seven rating metrics and their evaluator.
//!
//! Every metric has the same shape: an optional ratio term plus a sum of indicator columns,
//! divided by a fixed divisor and rounded to two decimals. Metrics differ only in data, so they
//! live in the [`METRICS`] table and share one evaluator.

use std::fmt;

use serde::Deserialize;

use crate::dictionary::DomainArea;
use crate::error::{CensusError, CensusResult};
use crate::processing::reshape::{Cell, WideTable};
use crate::types::Value;

/// Fact domain a metric reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RatingDomain {
    Infrastructure,
    Enrollment,
}

impl RatingDomain {
    pub fn area(self) -> DomainArea {
        match self {
            Self::Infrastructure => DomainArea::Infraestrutura,
            Self::Enrollment => DomainArea::Matricula,
        }
    }
}

/// What to do with a ratio whose denominator is zero (or unset).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ZeroDenominator {
    /// The ratio term counts as 0.
    #[default]
    Zero,
    /// The school is left out of the ratings and reported as a diagnostic.
    Skip,
}

/// How a ratio's zero denominator is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenominatorGuard {
    /// Always 0, whatever the configured policy.
    AlwaysZero,
    /// Per [`ZeroDenominator`].
    Configured,
}

/// `sum(numerators) / denominator`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ratio {
    pub numerators: &'static [&'static str],
    pub denominator: &'static str,
    pub guard: DenominatorGuard,
}

/// `round((ratio + sum(indicators)) / divisor, 2)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricDefinition {
    /// Output column is `{name}_rating`.
    pub name: &'static str,
    pub domain: RatingDomain,
    pub ratio: Option<Ratio>,
    /// Indicator columns; a column may appear more than once to weigh it double.
    pub indicators: &'static [&'static str],
    pub divisor: f64,
}

impl MetricDefinition {
    /// Every column the metric reads.
    pub fn columns(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.ratio
            .iter()
            .flat_map(|r| r.numerators.iter().copied().chain(std::iter::once(r.denominator)))
            .chain(self.indicators.iter().copied())
    }
}

pub const METRICS: [MetricDefinition; 7] = [
    MetricDefinition {
        name: "accessibility",
        domain: RatingDomain::Infrastructure,
        ratio: Some(Ratio {
            numerators: &["QT_SALAS_UTILIZADAS_ACESSIVEIS"],
            denominator: "QT_SALAS_UTILIZADAS",
            guard: DenominatorGuard::AlwaysZero,
        }),
        indicators: &[
            "IN_BANHEIRO_PNE",
            "IN_SALA_ATENDIMENTO_ESPECIAL",
            "IN_ACESSIBILIDADE_CORRIMAO",
            "IN_ACESSIBILIDADE_PISOS_TATEIS",
            "IN_ACESSIBILIDADE_VAO_LIVRE",
            "IN_ACESSIBILIDADE_RAMPAS",
            "IN_ACESSIBILIDADE_SINAL_TATIL",
        ],
        divisor: 8.0,
    },
    MetricDefinition {
        name: "recreation",
        domain: RatingDomain::Infrastructure,
        ratio: Some(Ratio {
            numerators: &["QT_SALAS_UTILIZA_CLIMATIZADAS"],
            denominator: "QT_SALAS_UTILIZADAS",
            guard: DenominatorGuard::Configured,
        }),
        indicators: &[
            "IN_TERREIRAO",
            "IN_AREA_PLANTIO",
            "IN_PATIO_COBERTO",
            "IN_PATIO_DESCOBERTO",
            "IN_PARQUE_INFANTIL",
            "IN_PISCINA",
            "IN_QUADRA_ESPORTES",
            "IN_TERREIRAO",
        ],
        divisor: 10.0,
    },
    MetricDefinition {
        name: "wellbeing",
        domain: RatingDomain::Infrastructure,
        ratio: None,
        indicators: &[
            "IN_AGUA_POTAVEL",
            "IN_ALIMENTACAO",
            "IN_COZINHA",
            "IN_REFEITORIO",
            "IN_ESGOTO_REDE_PUBLICA",
            "IN_ENERGIA_REDE_PUBLICA",
            "IN_LIXO_SERVICO_COLETA",
        ],
        divisor: 7.0,
    },
    MetricDefinition {
        name: "human_support",
        domain: RatingDomain::Enrollment,
        ratio: None,
        indicators: &[
            "QT_PROF_PSICOLOGO",
            "QT_PROF_ASSIST_SOCIAL",
            "QT_PROF_FONAUDIOLOGO",
            "QT_PROF_NUTRICIONISTA",
        ],
        divisor: 4.0,
    },
    MetricDefinition {
        name: "management",
        domain: RatingDomain::Enrollment,
        ratio: None,
        indicators: &[
            "IN_ORGAO_ASS_PAIS",
            "IN_ORGAO_CONSELHO_ESCOLAR",
            "IN_ORGAO_GREMIO_ESTUDANTIL",
        ],
        divisor: 3.0,
    },
    MetricDefinition {
        name: "age_grade_distortion",
        domain: RatingDomain::Enrollment,
        ratio: Some(Ratio {
            numerators: &[
                "QT_MAT_FUND_AF_6",
                "QT_MAT_FUND_AF_7",
                "QT_MAT_FUND_AF_8",
                "QT_MAT_FUND_AF_9",
            ],
            denominator: "QT_MAT_BAS_15_17",
            guard: DenominatorGuard::Configured,
        }),
        indicators: &[],
        divisor: 1.0,
    },
    MetricDefinition {
        name: "pedagogical",
        domain: RatingDomain::Infrastructure,
        ratio: None,
        indicators: &[
            "IN_BIBLIOTECA_SALA_LEITURA",
            "IN_LABORATORIO_INFORMATICA",
            "IN_LABORATORIO_CIENCIAS",
            "IN_BANDA_LARGA",
            "IN_INTERNET_ALUNOS",
            "IN_MATERIAL_PED_JOGOS",
        ],
        divisor: 6.0,
    },
];

/// Why a school could not be scored on a metric.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    ZeroDenominator { column: &'static str },
    NonNumeric { column: &'static str, raw: String },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ZeroDenominator { column } => write!(f, "denominator {column} is zero or unset"),
            Self::NonNumeric { column, raw } => write!(f, "non-numeric value '{raw}' in {column}"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct ColumnRef {
    name: &'static str,
    idx: usize,
}

#[derive(Debug, Clone)]
struct CompiledRatio {
    numerators: Vec<ColumnRef>,
    denominator: ColumnRef,
    guard: DenominatorGuard,
}

/// A [`MetricDefinition`] with its columns resolved against a wide table.
#[derive(Debug, Clone)]
pub struct CompiledMetric {
    pub definition: MetricDefinition,
    ratio: Option<CompiledRatio>,
    indicators: Vec<ColumnRef>,
}

impl CompiledMetric {
    /// Resolve every column of `definition` in `table`.
    ///
    /// A column the table does not have is a [`CensusError::Lookup`].
    pub fn compile(definition: MetricDefinition, table: &WideTable) -> CensusResult<Self> {
        let resolve = |name: &'static str| {
            table
                .column_index(name)
                .map(|idx| ColumnRef { name, idx })
                .ok_or_else(|| CensusError::Lookup {
                    domain: definition.domain.area().to_string(),
                    attribute: name.to_string(),
                })
        };
        let ratio = definition
            .ratio
            .map(|r| -> CensusResult<CompiledRatio> {
                Ok(CompiledRatio {
                    numerators: r.numerators.iter().map(|&n| resolve(n)).collect::<CensusResult<_>>()?,
                    denominator: resolve(r.denominator)?,
                    guard: r.guard,
                })
            })
            .transpose()?;
        let indicators = definition
            .indicators
            .iter()
            .map(|&n| resolve(n))
            .collect::<CensusResult<_>>()?;
        Ok(Self {
            definition,
            ratio,
            indicators,
        })
    }

    /// Score one school's wide row.
    pub fn evaluate(&self, row: &[Cell], policy: ZeroDenominator) -> Result<f64, SkipReason> {
        let ratio = match &self.ratio {
            None => 0.0,
            Some(r) => {
                let numerator = sum(row, &r.numerators)?;
                let denominator = cell_number(row, r.denominator)?;
                if denominator == 0.0 {
                    match (r.guard, policy) {
                        (DenominatorGuard::AlwaysZero, _) | (_, ZeroDenominator::Zero) => 0.0,
                        (DenominatorGuard::Configured, ZeroDenominator::Skip) => {
                            return Err(SkipReason::ZeroDenominator {
                                column: r.denominator.name,
                            });
                        }
                    }
                } else {
                    numerator / denominator
                }
            }
        };
        let total = ratio + sum(row, &self.indicators)?;
        Ok(round2(total / self.definition.divisor))
    }
}

fn sum(row: &[Cell], columns: &[ColumnRef]) -> Result<f64, SkipReason> {
    columns.iter().map(|&c| cell_number(row, c)).sum()
}

/// Unset and null cells count as 0.
fn cell_number(row: &[Cell], column: ColumnRef) -> Result<f64, SkipReason> {
    match &row[column.idx] {
        Cell::Unset | Cell::Reported(Value::Null) => Ok(0.0),
        Cell::Reported(v) => v.as_f64().ok_or_else(|| SkipReason::NonNumeric {
            column: column.name,
            raw: v.to_text(),
        }),
    }
}

/// Round to two decimals, ties to even (`0.125` becomes `0.12`).
pub fn round2(x: f64) -> f64 {
    (x * 100.0).round_ties_even() / 100.0
}
