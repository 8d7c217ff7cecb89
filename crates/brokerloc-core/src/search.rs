//! Site search over two independent result sets.
//!
//! Broker and article searches hit different tables and don't depend on each
//! other, so they run concurrently. Order is preserved within each list;
//! there is no ordering between the two.

use std::future::Future;

use anyhow::Result;

use crate::models::BrokerRecord;

#[derive(Debug, Clone, PartialEq)]
pub struct SearchResults<A> {
    pub brokers: Vec<BrokerRecord>,
    pub articles: Vec<A>,
}

impl<A> SearchResults<A> {
    pub fn is_empty(&self) -> bool {
        self.brokers.is_empty() && self.articles.is_empty()
    }

    pub fn total(&self) -> usize {
        self.brokers.len() + self.articles.len()
    }
}

/// Run both searches concurrently. Fails if either side fails.
pub async fn merge_results<A, FB, FA>(brokers: FB, articles: FA) -> Result<SearchResults<A>>
where
    FB: Future<Output = Result<Vec<BrokerRecord>>>,
    FA: Future<Output = Result<Vec<A>>>,
{
    let (brokers, articles) = futures::try_join!(brokers, articles)?;
    Ok(SearchResults { brokers, articles })
}

/// Case-insensitive name match, most trusted first.
pub fn match_brokers(brokers: &[BrokerRecord], query: &str) -> Vec<BrokerRecord> {
    let needle = query.trim().to_lowercase();
    let mut matches: Vec<BrokerRecord> = brokers
        .iter()
        .filter(|b| needle.is_empty() || b.name.to_lowercase().contains(&needle))
        .cloned()
        .collect();
    matches.sort_by(|a, b| b.trust_score.cmp(&a.trust_score));
    matches
}
