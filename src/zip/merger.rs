//! Grouping of wanted entries into contiguous download spans.
//!
//! A ranged request is far more expensive than a few extra bytes, so entries
//! that sit next to each other in the archive are fetched together.

use super::structures::ZipEntryDescriptor;

/// Upper-bound estimate of a local file header including name and extra field.
pub const DEFAULT_LOCAL_HEADER_SIZE_GUESS: u64 = 2048;

/// A contiguous byte range `[start_offset, end_offset)` covering one or more entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedSpan {
    pub start_offset: u64,
    pub end_offset: u64,
    /// Entries covered by this span, in the order they were requested.
    pub entries: Vec<ZipEntryDescriptor>,
}

impl MergedSpan {
    pub fn len(&self) -> u64 {
        self.end_offset - self.start_offset
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Merges entries into the fewest spans.
#[derive(Debug, Clone)]
pub struct EntryMerger {
    /// Archive size; no span ends past it.
    pub file_size: u64,
    pub header_size_guess: u64,
    /// Extra gap tolerated between the end of one span and the next entry.
    pub merge_distance: u64,
}

impl EntryMerger {
    pub fn new(file_size: u64) -> Self {
        Self {
            file_size,
            header_size_guess: DEFAULT_LOCAL_HEADER_SIZE_GUESS,
            merge_distance: 0,
        }
    }

    pub fn with_header_size_guess(mut self, guess: u64) -> Self {
        self.header_size_guess = guess;
        self
    }

    pub fn with_merge_distance(mut self, distance: u64) -> Self {
        self.merge_distance = distance;
        self
    }

    /// Estimated exclusive end of an entry's header and data, clamped to the archive.
    fn estimated_end(&self, entry: &ZipEntryDescriptor) -> u64 {
        entry
            .local_header_offset
            .saturating_add(self.header_size_guess)
            .saturating_add(entry.compressed_size)
            .min(self.file_size)
    }

    /// Sort `entries` by local header offset and greedily merge neighbours.
    ///
    /// Spans come out in offset order while the entries inside each span keep
    /// their order in `entries` (central directory order for a catalog
    /// listing). Entries sharing a local header offset are only scheduled once.
    pub fn create_collections(&self, entries: &[ZipEntryDescriptor]) -> Vec<MergedSpan> {
        let mut sorted: Vec<(usize, &ZipEntryDescriptor)> = entries.iter().enumerate().collect();
        sorted.sort_by_key(|(_, e)| e.local_header_offset);
        sorted.dedup_by_key(|(_, e)| e.local_header_offset);

        let mut groups: Vec<(u64, u64, Vec<(usize, &ZipEntryDescriptor)>)> = Vec::new();

        for (index, entry) in sorted {
            let end = self.estimated_end(entry);

            if let Some((_, current_end, members)) = groups.last_mut() {
                let reach = current_end.saturating_add(self.merge_distance);
                if entry.local_header_offset <= reach {
                    *current_end = (*current_end).max(end);
                    members.push((index, entry));
                    continue;
                }
            }

            groups.push((
                entry.local_header_offset.min(self.file_size),
                end,
                vec![(index, entry)],
            ));
        }

        groups
            .into_iter()
            .map(|(start_offset, end_offset, mut members)| {
                members.sort_by_key(|(index, _)| *index);
                MergedSpan {
                    start_offset,
                    end_offset,
                    entries: members.into_iter().map(|(_, e)| e.clone()).collect(),
                }
            })
            .collect()
    }
}
