//! Pairs RTSTRUCT labels with the image series they reference.

use std::collections::{HashMap, HashSet};

use log::warn;

use crate::{enums::MatchStrategy, rtstruct::LabelRecord, scanner::SeriesRecord};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Match<'a> {
    pub label: &'a LabelRecord,
    pub series: &'a SeriesRecord,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Correlation<'a> {
    pub matches: Vec<Match<'a>>,
    pub unmatched: Vec<&'a LabelRecord>,
}

pub fn correlate<'a>(
    labels: &'a [LabelRecord],
    series: &'a [SeriesRecord],
    strategy: MatchStrategy,
) -> Correlation<'a> {
    let correlation = match strategy {
        MatchStrategy::ByUid => match_by_uid(labels, series),
        MatchStrategy::SortedForwardSearch => match_sorted_forward(labels, series),
    };
    for label in &correlation.unmatched {
        warn!(
            "No series with UID {} for label {}",
            label.referenced_series_uid,
            label.path.display()
        );
    }
    correlation
}

fn match_by_uid<'a>(labels: &'a [LabelRecord], series: &'a [SeriesRecord]) -> Correlation<'a> {
    let mut by_uid: HashMap<&str, &SeriesRecord> = HashMap::new();
    for record in series {
        by_uid.entry(record.uid.as_str()).or_insert(record);
    }

    let mut correlation = Correlation::default();
    for label in labels {
        match by_uid.get(label.referenced_series_uid.as_str()) {
            Some(&series) => correlation.matches.push(Match { label, series }),
            None => correlation.unmatched.push(label),
        }
    }
    correlation
}

fn match_sorted_forward<'a>(
    labels: &'a [LabelRecord],
    series: &'a [SeriesRecord],
) -> Correlation<'a> {
    let referenced: HashSet<&str> = labels
        .iter()
        .map(|l| l.referenced_series_uid.as_str())
        .collect();

    let mut labels: Vec<&LabelRecord> = labels.iter().collect();
    let mut series: Vec<&SeriesRecord> = series
        .iter()
        .filter(|s| referenced.contains(s.uid.as_str()))
        .collect();
    labels.sort_by(|a, b| a.referenced_series_uid.cmp(&b.referenced_series_uid));
    series.sort_by(|a, b| a.uid.cmp(&b.uid));

    let mut paired = vec![false; labels.len()];
    let mut correlation = Correlation::default();

    if labels.len() == series.len() {
        for (i, (&label, &series)) in labels.iter().zip(&series).enumerate() {
            if label.referenced_series_uid == series.uid {
                correlation.matches.push(Match { label, series });
                paired[i] = true;
            }
        }
    } else if labels.len() < series.len() {
        for (i, &label) in labels.iter().enumerate() {
            let found = series[i..]
                .iter()
                .find(|s| s.uid == label.referenced_series_uid);
            if let Some(&series) = found {
                correlation.matches.push(Match { label, series });
                paired[i] = true;
            }
        }
    } else {
        for (i, &series) in series.iter().enumerate() {
            let found = (i..labels.len())
                .find(|&j| !paired[j] && labels[j].referenced_series_uid == series.uid);
            if let Some(j) = found {
                correlation.matches.push(Match {
                    label: labels[j],
                    series,
                });
                paired[j] = true;
            }
        }
    }

    correlation.unmatched = labels
        .iter()
        .zip(&paired)
        .filter(|(_, paired)| !**paired)
        .map(|(label, _)| *label)
        .collect();
    correlation
}
