use super::id::{find_identifiers, EncodedId, Encoding, ItemId, SwapRule, TextForm};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

/// Position of an observation in job order: (job file index, ordinal inside the file).
pub type Encounter = (usize, u64);

#[derive(Debug, Clone)]
struct PendingEntity {
    order: Encounter,
    kind: String,
    old_path: String,
    new_path: String,
    old_id: Option<ItemId>,
}

/// Old identifier to new identifier, keyed by (type, old canonical path).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentifierRecord {
    pub kind: String,
    pub old_path: String,
    pub new_path: String,
    pub old_id: ItemId,
    pub new_id: ItemId,
}

/// Entities whose rewritten paths coincide. The first member is the one retained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeGroup {
    pub kind: String,
    pub new_path: String,
    pub new_id: ItemId,
    pub members: Vec<(ItemId, String)>,
}

impl MergeGroup {
    pub fn retained(&self) -> ItemId {
        self.members[0].0
    }
}

#[derive(Debug, Default, Clone)]
pub struct FinalizeSummary {
    pub remapped: usize,
    pub unchanged: usize,
    pub merges: Vec<MergeGroup>,
}

/// Result of substituting identifiers embedded in free text.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TextSubstitution {
    pub text: Option<String>,
    pub replaced: usize,
    pub unresolved: Vec<String>,
}

#[derive(Default)]
struct RegistryState {
    pending: Vec<PendingEntity>,
    records: Vec<IdentifierRecord>,
    by_old_id: HashMap<ItemId, usize>,
    by_entity: HashMap<(String, String), usize>,
    by_new_id: HashMap<ItemId, usize>,
    merges: Vec<MergeGroup>,
    known: HashSet<ItemId>,
    finalized: bool,
}

/// Shared old→new identifier table for one run.
///
/// Phase 1 records `(type, old path) → new path` observations; `finalize` turns them
/// into identifier records in job order. Entries are append-only. All access goes
/// through one mutex so jobs may run on a worker pool.
pub struct IdentifierRegistry {
    swap: SwapRule,
    state: Mutex<RegistryState>,
}

impl IdentifierRegistry {
    pub fn new(swap: SwapRule) -> Self {
        Self {
            swap,
            state: Mutex::new(RegistryState::default()),
        }
    }

    pub fn swap_rule(&self) -> &SwapRule {
        &self.swap
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record that the entity `(kind, old_path)` now lives at `new_path`.
    /// `old_id` is the identifier stored alongside the entity, when there is one.
    pub fn record_path(
        &self,
        order: Encounter,
        kind: &str,
        old_path: &str,
        new_path: &str,
        old_id: Option<ItemId>,
    ) {
        let mut state = self.lock();
        if state.finalized {
            warn!(
                "Ignoring path mapping for {} recorded after identifiers were computed",
                old_path
            );
            return;
        }
        if let Some(id) = old_id {
            state.known.insert(id);
        }
        state.pending.push(PendingEntity {
            order,
            kind: kind.to_string(),
            old_path: old_path.to_string(),
            new_path: new_path.to_string(),
            old_id,
        });
    }

    /// Remember an identifier that exists in the source data but whose path is not rewritten.
    pub fn note_known(&self, id: ItemId) {
        self.lock().known.insert(id);
    }

    /// Compute new identifiers for every recorded entity, first encounter first.
    pub fn finalize(&self) -> FinalizeSummary {
        let mut state = self.lock();
        if state.finalized {
            return FinalizeSummary {
                remapped: state.records.len(),
                unchanged: 0,
                merges: state.merges.clone(),
            };
        }
        state.finalized = true;

        let mut pending = std::mem::take(&mut state.pending);
        pending.sort_by_key(|p| p.order);

        let mut summary = FinalizeSummary::default();
        for entity in pending {
            let key = (entity.kind.clone(), entity.old_path.clone());
            if state.by_entity.contains_key(&key) {
                continue;
            }
            let old_id = entity
                .old_id
                .unwrap_or_else(|| ItemId::derive(&entity.kind, &entity.old_path));
            let new_id = ItemId::derive(&entity.kind, &entity.new_path);
            state.known.insert(old_id);
            state.known.insert(new_id);

            if entity.old_path == entity.new_path || old_id == new_id {
                summary.unchanged += 1;
                continue;
            }
            if state.by_old_id.contains_key(&old_id) {
                debug!("Identifier {} already mapped, skipping {}", old_id, entity.old_path);
                continue;
            }

            let index = state.records.len();
            if let Some(&first) = state.by_new_id.get(&new_id) {
                let first_record = state.records[first].clone();
                match state.merges.iter_mut().find(|m| m.new_id == new_id) {
                    Some(group) => group.members.push((old_id, entity.old_path.clone())),
                    None => state.merges.push(MergeGroup {
                        kind: entity.kind.clone(),
                        new_path: entity.new_path.clone(),
                        new_id,
                        members: vec![
                            (first_record.old_id, first_record.old_path),
                            (old_id, entity.old_path.clone()),
                        ],
                    }),
                }
            } else {
                state.by_new_id.insert(new_id, index);
            }

            state.by_old_id.insert(old_id, index);
            state.by_entity.insert(key, index);
            state.records.push(IdentifierRecord {
                kind: entity.kind,
                old_path: entity.old_path,
                new_path: entity.new_path,
                old_id,
                new_id,
            });
        }

        summary.remapped = state.records.len();
        summary.merges = state.merges.clone();
        info!(
            "{} identifiers remapped, {} unchanged, {} merge groups",
            summary.remapped,
            summary.unchanged,
            summary.merges.len()
        );
        summary
    }

    /// New path and identifier for `(kind, old_path)`, if that entity moved.
    pub fn resolve(&self, kind: &str, old_path: &str) -> Option<(String, ItemId)> {
        let state = self.lock();
        state
            .by_entity
            .get(&(kind.to_string(), old_path.to_string()))
            .map(|&i| (state.records[i].new_path.clone(), state.records[i].new_id))
    }

    pub fn lookup(&self, old_id: &ItemId) -> Option<ItemId> {
        let state = self.lock();
        state.by_old_id.get(old_id).map(|&i| state.records[i].new_id)
    }

    /// Position of the record for `old_id` in encounter order.
    pub fn record_index(&self, old_id: &ItemId) -> Option<usize> {
        self.lock().by_old_id.get(old_id).copied()
    }

    /// True when `id` belongs to an entity seen during the run, before or after remapping.
    pub fn is_known(&self, id: &ItemId) -> bool {
        self.lock().known.contains(id)
    }

    /// True when `old_id` belongs to a merge group without being its retained member.
    pub fn superseded(&self, old_id: &ItemId) -> bool {
        self.lock()
            .merges
            .iter()
            .any(|group| group.members.iter().skip(1).any(|(id, _)| id == old_id))
    }

    pub fn records(&self) -> Vec<IdentifierRecord> {
        self.lock().records.clone()
    }

    pub fn merges(&self) -> Vec<MergeGroup> {
        self.lock().merges.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Replace a value stored with a declared encoding, keeping that encoding.
    /// Returns `Ok(None)` for values of the right shape whose identifier did not move
    /// and `Err(())` when the value does not decode as `encoding` at all.
    pub fn substitute(
        &self,
        value: &EncodedId,
        encoding: Encoding,
    ) -> Result<Option<EncodedId>, ()> {
        let old = ItemId::decode(value, encoding, &self.swap).ok_or(())?;
        Ok(self.lookup(&old).map(|new| new.encode(encoding, &self.swap)))
    }

    /// Replace every identifier embedded in `text`, in whichever variant it was found.
    ///
    /// When an identifier is a path component and the component before it is a
    /// prefix of the old identifier text (the `ab/abcdef…` bucket layout), that
    /// component is replaced by the same-length prefix of the new text.
    pub fn substitute_text(&self, text: &str) -> TextSubstitution {
        let mut result = TextSubstitution::default();
        let mut edits: Vec<(usize, usize, String)> = Vec::new();

        for found in find_identifiers(text) {
            let raw = &text[found.start..found.end];
            let Some((old_text, new_text)) = self.map_text(raw, found.form) else {
                let plain = Self::text_candidates(raw, found.form, &self.swap);
                if !plain.iter().any(|id| self.is_known(id)) {
                    result.unresolved.push(raw.to_string());
                }
                continue;
            };

            if let Some((bucket_start, bucket_end)) = bucket_before(text, found.start) {
                let bucket = &text[bucket_start..bucket_end];
                if bucket.len() < old_text.len() && old_text.starts_with(bucket) {
                    if edits.last().map_or(true, |(_, end, _)| *end <= bucket_start) {
                        edits.push((bucket_start, bucket_end, new_text[..bucket.len()].to_string()));
                    }
                }
            }
            edits.push((found.start, found.end, new_text));
            result.replaced += 1;
        }

        if !edits.is_empty() {
            let mut out = String::with_capacity(text.len());
            let mut cursor = 0;
            for (start, end, replacement) in edits {
                out.push_str(&text[cursor..start]);
                out.push_str(&replacement);
                cursor = end;
            }
            out.push_str(&text[cursor..]);
            result.text = Some(out);
        }
        result
    }

    fn map_text(&self, raw: &str, form: TextForm) -> Option<(String, String)> {
        let value = EncodedId::Text(raw.to_string());
        for swapped in [false, true] {
            let encoding = Encoding::text(form, swapped);
            if let Ok(Some(EncodedId::Text(new_text))) = self.substitute(&value, encoding) {
                return Some((raw.to_string(), new_text));
            }
        }
        None
    }

    fn text_candidates(raw: &str, form: TextForm, swap: &SwapRule) -> Vec<ItemId> {
        let value = EncodedId::Text(raw.to_string());
        [false, true]
            .into_iter()
            .filter_map(|swapped| ItemId::decode(&value, Encoding::text(form, swapped), swap))
            .collect()
    }
}

/// Byte range of the path component right before `start`, if `start` begins a component.
fn bucket_before(text: &str, start: usize) -> Option<(usize, usize)> {
    let before = &text[..start];
    let sep_end = before.len();
    if !(before.ends_with('/') || before.ends_with('\\')) {
        return None;
    }
    let component_end = sep_end - 1;
    let component_start = before[..component_end]
        .rfind(|c| c == '/' || c == '\\')
        .map_or(0, |i| i + 1);
    if component_start == component_end {
        return None;
    }
    Some((component_start, component_end))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_with(entries: &[(&str, &str, &str)]) -> IdentifierRegistry {
        let registry = IdentifierRegistry::new(SwapRule::default());
        for (i, (kind, old, new)) in entries.iter().enumerate() {
            registry.record_path((0, i as u64), kind, old, new, None);
        }
        registry.finalize();
        registry
    }

    #[test]
    fn test_finalize_remaps_moved_entities() {
        let registry = registry_with(&[("folder", "F:/TV/Show", "/data/tv/Show")]);
        let old = ItemId::derive("folder", "F:/TV/Show");
        let new = ItemId::derive("folder", "/data/tv/Show");
        assert_eq!(registry.lookup(&old), Some(new));
        assert_eq!(
            registry.resolve("folder", "F:/TV/Show"),
            Some(("/data/tv/Show".to_string(), new))
        );
        assert!(registry.is_known(&new));
    }

    #[test]
    fn test_unchanged_paths_are_not_remapped() {
        let registry = registry_with(&[("folder", "/same", "/same")]);
        assert!(registry.is_empty());
        assert!(registry.is_known(&ItemId::derive("folder", "/same")));
    }

    #[test]
    fn test_merge_keeps_first_encounter() {
        let registry = IdentifierRegistry::new(SwapRule::default());
        // recorded out of order; encounter keys decide
        registry.record_path((1, 0), "folder", "D:/TV/Show", "/data/tv/Show", None);
        registry.record_path((0, 5), "folder", "F:/TV/Show", "/data/tv/Show", None);
        let summary = registry.finalize();

        assert_eq!(summary.merges.len(), 1);
        let group = &summary.merges[0];
        assert_eq!(group.members.len(), 2);
        assert_eq!(group.retained(), ItemId::derive("folder", "F:/TV/Show"));
        assert_eq!(group.new_id, ItemId::derive("folder", "/data/tv/Show"));

        let a = registry.lookup(&ItemId::derive("folder", "F:/TV/Show"));
        let b = registry.lookup(&ItemId::derive("folder", "D:/TV/Show"));
        assert_eq!(a, b);
        assert!(registry.superseded(&ItemId::derive("folder", "D:/TV/Show")));
        assert!(!registry.superseded(&ItemId::derive("folder", "F:/TV/Show")));
    }

    #[test]
    fn test_chained_moves_are_not_merges() {
        // one entity moves onto the old location of another that moves on
        let registry = registry_with(&[
            ("movie", "D:/M/a.mkv", "E:/M/a.mkv"),
            ("movie", "E:/M/a.mkv", "F:/M/a.mkv"),
        ]);
        assert!(registry.merges().is_empty());
        let first = ItemId::derive("movie", "D:/M/a.mkv");
        let second = ItemId::derive("movie", "E:/M/a.mkv");
        assert_eq!(registry.lookup(&first), Some(second));
        assert_eq!(registry.lookup(&second), Some(ItemId::derive("movie", "F:/M/a.mkv")));
        assert!(!registry.superseded(&first));
        assert!(!registry.superseded(&second));
    }

    #[test]
    fn test_substitute_keeps_declared_encoding() {
        let registry = registry_with(&[("folder", "F:/TV/Show", "/data/tv/Show")]);
        let swap = SwapRule::default();
        let old = ItemId::derive("folder", "F:/TV/Show");
        let new = ItemId::derive("folder", "/data/tv/Show");

        let dashed = old.encode(Encoding::StrDash, &swap);
        assert_eq!(
            registry.substitute(&dashed, Encoding::StrDash),
            Ok(Some(new.encode(Encoding::StrDash, &swap)))
        );
        assert_eq!(registry.substitute(&dashed, Encoding::Bin), Err(()));

        let other = ItemId::derive("folder", "/unrelated").encode(Encoding::Bin, &swap);
        assert_eq!(registry.substitute(&other, Encoding::Bin), Ok(None));
    }

    #[test]
    fn test_substitute_text_rewrites_bucket_and_keeps_variant() {
        let registry = registry_with(&[("folder", "F:/TV/Show", "/data/tv/Show")]);
        let swap = SwapRule::default();
        let old = ItemId::derive("folder", "F:/TV/Show");
        let new = ItemId::derive("folder", "/data/tv/Show");
        let EncodedId::Text(old_text) = old.encode(Encoding::AncestorStr, &swap) else {
            unreachable!()
        };
        let EncodedId::Text(new_text) = new.encode(Encoding::AncestorStr, &swap) else {
            unreachable!()
        };

        let input = format!("%MetadataPath%/library/{}/{}/poster.jpg", &old_text[..2], old_text);
        let out = registry.substitute_text(&input);
        assert_eq!(out.replaced, 1);
        assert_eq!(
            out.text.unwrap(),
            format!("%MetadataPath%/library/{}/{}/poster.jpg", &new_text[..2], new_text)
        );
    }

    #[test]
    fn test_substitute_text_reports_unknown_identifiers() {
        let registry = registry_with(&[("folder", "F:/TV/Show", "/data/tv/Show")]);
        let out = registry.substitute_text("user 0123456789abcdef0123456789abcdef");
        assert_eq!(out.text, None);
        assert_eq!(out.unresolved, vec!["0123456789abcdef0123456789abcdef".to_string()]);
    }
}
