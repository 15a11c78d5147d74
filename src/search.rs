use std::collections::{BTreeSet, HashMap};

use serde::Serialize;
use tracing::{debug, warn};

use crate::{
    catalog::{Catalog, FileRecord},
    error::Result,
    tags::TagGenerator,
};

/// A ranked search result.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    /// 1-based position in the result list.
    pub rank: usize,
    /// Query tags this file carries, sorted.
    pub matched_tags: Vec<String>,
    pub file: FileRecord,
}

/// Rank stored files by how many of the query's tags they carry.
///
/// 1. Tag the query (no tags, no results)
/// 2. Collect the files of every query tag
/// 3. Sort by overlap count, highest first, then by id
/// 4. Resolve ids to records, skipping ids that no longer resolve
/// 5. Limit to `limit` results when given
pub fn search(
    query: &str,
    tagger: &TagGenerator,
    catalog: &Catalog,
    limit: Option<usize>,
) -> Result<Vec<SearchHit>> {
    let query_tags = tagger.generate_tags(query);
    if query_tags.is_empty() {
        debug!(query, "query produced no tags");
        return Ok(vec![]);
    }

    let matches = tally(&query_tags, catalog)?;
    let mut ranked: Vec<(u64, Vec<String>)> = matches.into_iter().collect();
    ranked.sort_by(|(a_id, a_tags), (b_id, b_tags)| {
        b_tags.len().cmp(&a_tags.len()).then(a_id.cmp(b_id))
    });

    let limit = limit.unwrap_or(usize::MAX);
    let mut hits = Vec::new();
    for (id, matched_tags) in ranked {
        if hits.len() >= limit {
            break;
        }
        match catalog.get_file(id)? {
            Some(file) => hits.push(SearchHit {
                rank: hits.len() + 1,
                matched_tags,
                file,
            }),
            None => warn!(id, "search matched a file that no longer exists"),
        }
    }

    debug!(
        query,
        tags = query_tags.len(),
        hits = hits.len(),
        "search complete"
    );
    Ok(hits)
}

/// Map every matching file id to the query tags it carries. A file counts
/// once per tag no matter how many association rows link them.
fn tally(
    query_tags: &BTreeSet<String>,
    catalog: &Catalog,
) -> Result<HashMap<u64, Vec<String>>> {
    let mut matches: HashMap<u64, Vec<String>> = HashMap::new();
    for tag in query_tags {
        for id in catalog.file_ids_for_tag(tag)? {
            matches.entry(id).or_default().push(tag.clone());
        }
    }
    Ok(matches)
}
