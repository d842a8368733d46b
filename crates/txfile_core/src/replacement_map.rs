//! Interval map of replacement bytes.
//!
//! A [`ReplacementMap`] shadows byte ranges of an underlying file. Entries are
//! keyed by their start offset and never overlap. A write that partially
//! covers an entry splits it; the remaining pieces share the original buffer.
//!
//! Mutations are staged in a [`ReplacementTx`] and applied together by
//! [`ReplacementTx::commit`]. Dropping the staging object leaves the map as
//! it was.

use bytes::Bytes;
use std::collections::BTreeMap;
use std::ops::Bound;

/// An ordered, non-overlapping set of `offset -> bytes` entries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplacementMap {
    entries: BTreeMap<u64, Bytes>,
}

impl ReplacementMap {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the map holds no bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Removes every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Iterates entries in offset order.
    pub fn iter(&self) -> impl Iterator<Item = (u64, &Bytes)> + '_ {
        self.entries.iter().map(|(off, data)| (*off, data))
    }

    /// Reads replacement bytes at `offset`.
    ///
    /// At most `min(*len, buf.len())` bytes are considered. If an entry
    /// covers `offset`, its bytes are copied into `buf` and the count is
    /// returned. Otherwise nothing is read, `*len` is clipped to the distance
    /// to the next entry, and 0 is returned: the caller should read that many
    /// bytes from the layer underneath.
    pub fn read_at(&self, offset: u64, buf: &mut [u8], len: &mut usize) -> usize {
        *len = (*len).min(buf.len());
        if *len == 0 {
            return 0;
        }

        if let Some((&start, data)) = self.entries.range(..=offset).next_back() {
            let end = start + data.len() as u64;
            if offset < end {
                let skip = (offset - start) as usize;
                let n = (*len).min(data.len() - skip);
                buf[..n].copy_from_slice(&data[skip..skip + n]);
                return n;
            }
        }

        if let Some((&next, _)) = self
            .entries
            .range((Bound::Excluded(offset), Bound::Unbounded))
            .next()
        {
            let gap = next - offset;
            if gap < *len as u64 {
                *len = gap as usize;
            }
        }
        0
    }

    /// Stages a write of `data` at `offset`.
    ///
    /// With `overwrite`, existing bytes in the range are replaced. Without
    /// it, only gaps are filled.
    pub fn write_at(&mut self, offset: u64, data: &[u8], overwrite: bool) -> ReplacementTx<'_> {
        self.write_bytes_at(offset, Bytes::copy_from_slice(data), overwrite)
    }

    /// Stages a write of an owned buffer. See [`Self::write_at`].
    pub fn write_bytes_at(&mut self, offset: u64, data: Bytes, overwrite: bool) -> ReplacementTx<'_> {
        let mut tx = ReplacementTx {
            map: self,
            to_erase: Vec::new(),
            to_insert: Vec::new(),
        };
        if data.is_empty() {
            return tx;
        }

        let begin = offset;
        let end = offset + data.len() as u64;
        let overlapping = tx.map.overlapping(begin, end);

        if overwrite {
            for (start, existing) in overlapping {
                let existing_end = start + existing.len() as u64;
                tx.to_erase.push(start);
                if start < begin {
                    tx.to_insert
                        .push((start, existing.slice(..(begin - start) as usize)));
                }
                if existing_end > end {
                    tx.to_insert
                        .push((end, existing.slice((end - start) as usize..)));
                }
            }
            tx.to_insert.push((begin, data));
        } else {
            let mut cursor = begin;
            for (start, existing) in overlapping {
                if start > cursor {
                    tx.to_insert.push((
                        cursor,
                        data.slice((cursor - begin) as usize..(start - begin) as usize),
                    ));
                }
                cursor = cursor.max(start + existing.len() as u64);
            }
            if cursor < end {
                tx.to_insert
                    .push((cursor, data.slice((cursor - begin) as usize..)));
            }
        }
        tx
    }

    /// Drops every byte at or past `new_size`.
    pub fn truncate(&mut self, new_size: u64) {
        drop(self.entries.split_off(&new_size));
        if let Some(mut last) = self.entries.last_entry() {
            // Every remaining entry starts below new_size, so keep > 0.
            let keep = new_size - *last.key();
            if (last.get().len() as u64) > keep {
                let clipped = last.get().slice(..keep as usize);
                *last.get_mut() = clipped;
            }
        }
    }

    /// Returns the entries intersecting `[begin, end)`, in offset order.
    fn overlapping(&self, begin: u64, end: u64) -> Vec<(u64, Bytes)> {
        let mut found: Vec<(u64, Bytes)> = self
            .entries
            .range(..end)
            .rev()
            .take_while(|(start, data)| **start + data.len() as u64 > begin)
            .map(|(start, data)| (*start, data.clone()))
            .collect();
        found.reverse();
        found
    }
}

/// Staged changes to a [`ReplacementMap`].
///
/// Holds the map exclusively until committed or dropped.
#[must_use = "a replacement transaction does nothing unless committed"]
#[derive(Debug)]
pub struct ReplacementTx<'a> {
    map: &'a mut ReplacementMap,
    to_erase: Vec<u64>,
    to_insert: Vec<(u64, Bytes)>,
}

impl ReplacementTx<'_> {
    /// Applies the staged erasures and insertions.
    pub fn commit(self) {
        for start in self.to_erase {
            self.map.entries.remove(&start);
        }
        for (start, data) in self.to_insert {
            debug_assert!(!data.is_empty());
            self.map.entries.insert(start, data);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn read_all(map: &ReplacementMap, offset: u64, len: usize) -> Vec<Option<u8>> {
        let mut out = Vec::with_capacity(len);
        let mut pos = offset;
        while out.len() < len {
            let mut buf = vec![0u8; len - out.len()];
            let mut want = buf.len();
            let n = map.read_at(pos, &mut buf, &mut want);
            if n == 0 {
                assert!(want > 0);
                out.extend(std::iter::repeat(None).take(want));
                pos += want as u64;
            } else {
                out.extend(buf[..n].iter().map(|b| Some(*b)));
                pos += n as u64;
            }
        }
        out
    }

    fn assert_no_overlap(map: &ReplacementMap) {
        let mut prev_end = 0u64;
        for (start, data) in map.iter() {
            assert!(!data.is_empty(), "empty entry at {start}");
            assert!(start >= prev_end, "entry at {start} overlaps previous end {prev_end}");
            prev_end = start + data.len() as u64;
        }
    }

    #[test]
    fn empty_map_reads_passthrough() {
        let map = ReplacementMap::new();
        let mut buf = [0u8; 8];
        let mut len = 8;
        assert_eq!(map.read_at(0, &mut buf, &mut len), 0);
        assert_eq!(len, 8);
    }

    #[test]
    fn read_clips_to_next_entry() {
        let mut map = ReplacementMap::new();
        map.write_at(5, b"xyz", true).commit();

        let mut buf = [0u8; 10];
        let mut len = 10;
        assert_eq!(map.read_at(0, &mut buf, &mut len), 0);
        assert_eq!(len, 5);

        let mut len = 10;
        assert_eq!(map.read_at(6, &mut buf, &mut len), 2);
        assert_eq!(&buf[..2], b"yz");
    }

    #[test]
    fn overwrite_splits_entry() {
        let mut map = ReplacementMap::new();
        map.write_at(0, b"AAAA", true).commit();
        map.write_at(1, b"BB", true).commit();

        assert_eq!(map.len(), 3);
        assert_no_overlap(&map);
        let bytes: Vec<u8> = read_all(&map, 0, 4).into_iter().flatten().collect();
        assert_eq!(bytes, b"ABBA");
    }

    #[test]
    fn overwrite_spanning_several_entries() {
        let mut map = ReplacementMap::new();
        map.write_at(0, b"aa", true).commit();
        map.write_at(4, b"bb", true).commit();
        map.write_at(8, b"cc", true).commit();
        map.write_at(1, b"XXXXXXXX", true).commit();

        assert_no_overlap(&map);
        let bytes: Vec<u8> = read_all(&map, 0, 10).into_iter().flatten().collect();
        assert_eq!(bytes, b"aXXXXXXXXc");
    }

    #[test]
    fn gap_fill_keeps_existing_bytes() {
        let mut map = ReplacementMap::new();
        map.write_at(2, b"xx", true).commit();
        map.write_at(0, b"abcdef", false).commit();

        assert_no_overlap(&map);
        let bytes: Vec<u8> = read_all(&map, 0, 6).into_iter().flatten().collect();
        assert_eq!(bytes, b"abxxef");
    }

    #[test]
    fn abutting_write_leaves_no_empty_entries() {
        let mut map = ReplacementMap::new();
        map.write_at(0, b"ab", true).commit();
        map.write_at(4, b"ef", true).commit();
        map.write_at(2, b"cd", true).commit();
        map.write_at(0, b"abcdef", false).commit();

        assert_eq!(map.len(), 3);
        assert_no_overlap(&map);
    }

    #[test]
    fn zero_length_write_is_noop() {
        let mut map = ReplacementMap::new();
        map.write_at(3, b"abc", true).commit();
        map.write_at(4, b"", true).commit();
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn dropped_tx_rolls_back() {
        let mut map = ReplacementMap::new();
        map.write_at(0, b"keep", true).commit();
        {
            let _tx = map.write_at(0, b"lose", true);
        }
        let bytes: Vec<u8> = read_all(&map, 0, 4).into_iter().flatten().collect();
        assert_eq!(bytes, b"keep");
    }

    #[test]
    fn truncate_clips_straddling_entry() {
        let mut map = ReplacementMap::new();
        map.write_at(0, b"abcd", true).commit();
        map.write_at(10, b"zz", true).commit();
        map.truncate(2);

        assert_eq!(map.len(), 1);
        assert_eq!(read_all(&map, 0, 4), vec![Some(b'a'), Some(b'b'), None, None]);
    }

    #[test]
    fn truncate_at_entry_boundary() {
        let mut map = ReplacementMap::new();
        map.write_at(0, b"ab", true).commit();
        map.write_at(2, b"cd", true).commit();
        map.truncate(2);
        assert_eq!(map.len(), 1);
        map.truncate(0);
        assert!(map.is_empty());
    }

    proptest! {
        #[test]
        fn last_writer_wins_without_overlap(
            writes in prop::collection::vec(
                (0u64..48, prop::collection::vec(any::<u8>(), 0..12), any::<bool>()),
                0..40,
            )
        ) {
            let mut map = ReplacementMap::new();
            let mut model: Vec<Option<u8>> = vec![None; 64];
            for (offset, data, overwrite) in &writes {
                map.write_at(*offset, data, *overwrite).commit();
                for (i, b) in data.iter().enumerate() {
                    let slot = &mut model[*offset as usize + i];
                    if *overwrite || slot.is_none() {
                        *slot = Some(*b);
                    }
                }
            }

            assert_no_overlap(&map);
            prop_assert_eq!(read_all(&map, 0, 64), model);
        }
    }
}
