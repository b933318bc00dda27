//! Collection-group discovery (spec §4.C, §9 Open Question (c)).

/// Returns every physical collection name that is either exactly
/// `collection_id` or ends with a `/{collection_id}` suffix, tolerating `/`
/// and its percent-encoded form `%2F` as the hierarchy separator — but never
/// mixing both encodings within the same trailing segment of a single
/// candidate name (spec §9 (c)).
pub fn matching_collection_names<'a>(
    all_names: &'a [String],
    collection_id: &str,
) -> Vec<&'a str> {
    all_names
        .iter()
        .map(String::as_str)
        .filter(|name| matches_collection_group(name, collection_id))
        .collect()
}

fn matches_collection_group(name: &str, collection_id: &str) -> bool {
    if name == collection_id {
        return true;
    }
    ends_with_segment(name, collection_id, "/") || ends_with_segment(name, collection_id, "%2F")
}

fn ends_with_segment(name: &str, collection_id: &str, separator: &str) -> bool {
    let suffix = format!("{separator}{collection_id}");
    name.ends_with(&suffix)
}
