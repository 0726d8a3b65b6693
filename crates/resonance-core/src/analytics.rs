//! Per-channel statistics derived from the mutation history.

use std::collections::{BTreeMap, HashMap};

use resonance_types::{ContributionKind, HistoryEntry, MutationCause, SourceId};
use serde::Serialize;

/// Default number of sources listed in [`ChannelAnalytics::top_sources`].
pub const DEFAULT_TOP_SOURCES: usize = 5;

/// Aggregate impact of one source on a channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceImpact {
    /// Producer.
    pub source_id: SourceId,
    /// Sum of absolute applied deltas.
    pub total_impact: f64,
    /// Contributions counted, coalesced ones included.
    pub contributions: u32,
}

/// Statistics for one channel over the retained history.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelAnalytics {
    /// Channel name.
    pub channel: String,
    /// Number of history entries that touched the channel.
    pub samples: usize,
    /// Mean post-mutation value.
    pub average: Option<f64>,
    /// Lowest post-mutation value.
    pub min: Option<f64>,
    /// Highest post-mutation value.
    pub max: Option<f64>,
    /// Mean absolute change between consecutive samples.
    pub volatility: Option<f64>,
    /// Last sample minus first sample.
    pub trend: Option<f64>,
    /// Contributions per kind, coalesced ones included.
    pub contributions_by_kind: BTreeMap<ContributionKind, u32>,
    /// Decay steps applied.
    pub decay_steps: usize,
    /// Sources ordered by descending impact.
    pub top_sources: Vec<SourceImpact>,
}

fn as_f64(count: usize) -> f64 {
    f64::from(u32::try_from(count).unwrap_or(u32::MAX))
}

impl ChannelAnalytics {
    /// Compute statistics for `channel` from `entries` (oldest first).
    pub fn compute(channel: &str, entries: &[HistoryEntry], top_n: usize) -> Self {
        let touching: Vec<&HistoryEntry> = entries.iter().filter(|e| e.channel == channel).collect();
        let values: Vec<f64> = touching.iter().filter_map(|e| e.state.get(channel)).collect();

        let mut contributions_by_kind = BTreeMap::new();
        let mut impacts: HashMap<&SourceId, (f64, u32)> = HashMap::new();
        let mut decay_steps = 0_usize;

        for entry in &touching {
            match &entry.cause {
                MutationCause::Contribution {
                    contribution,
                    applied_delta,
                    coalesced,
                } => {
                    let kind_count = contributions_by_kind.entry(contribution.kind).or_insert(0_u32);
                    *kind_count = kind_count.saturating_add(*coalesced);

                    let impact = impacts.entry(&contribution.source_id).or_insert((0.0, 0));
                    impact.0 += applied_delta.abs();
                    impact.1 = impact.1.saturating_add(*coalesced);
                }
                MutationCause::Decay { .. } => decay_steps = decay_steps.saturating_add(1),
                MutationCause::Direct => {}
            }
        }

        let mut top_sources: Vec<SourceImpact> = impacts
            .into_iter()
            .map(|(source_id, (total_impact, contributions))| SourceImpact {
                source_id: source_id.clone(),
                total_impact,
                contributions,
            })
            .collect();
        top_sources.sort_by(|a, b| {
            b.total_impact
                .total_cmp(&a.total_impact)
                .then_with(|| a.source_id.cmp(&b.source_id))
        });
        top_sources.truncate(top_n);

        let (average, min, max) = if values.is_empty() {
            (None, None, None)
        } else {
            let sum: f64 = values.iter().sum();
            (
                Some(sum / as_f64(values.len())),
                values.iter().copied().reduce(f64::min),
                values.iter().copied().reduce(f64::max),
            )
        };

        let steps: Vec<f64> = values
            .windows(2)
            .filter_map(|w| match w {
                [a, b] => Some((b - a).abs()),
                _ => None,
            })
            .collect();
        let volatility =
            (!steps.is_empty()).then(|| steps.iter().sum::<f64>() / as_f64(steps.len()));

        let trend = match (values.first(), values.last()) {
            (Some(first), Some(last)) if values.len() > 1 => Some(last - first),
            _ => None,
        };

        Self {
            channel: channel.to_owned(),
            samples: values.len(),
            average,
            min,
            max,
            volatility,
            trend,
            contributions_by_kind,
            decay_steps,
            top_sources,
        }
    }
}
