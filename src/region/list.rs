use std::fmt::Write;

use serde::Serialize;

use super::{RegionId, RegionSink, StyleFlags, TaggedRegion, ThumbnailImage};

/// In-memory [`RegionSink`] that keeps every region in emission order.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct RegionList {
    regions: Vec<TaggedRegion>,
}

impl RegionList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    pub fn get(&self, id: RegionId) -> Option<&TaggedRegion> {
        self.regions.get(id.index())
    }

    /// All regions with their ids, in emission order.
    pub fn iter(&self) -> impl Iterator<Item = (RegionId, &TaggedRegion)> {
        self.regions
            .iter()
            .enumerate()
            .map(|(i, r)| (RegionId::from_index(i), r))
    }

    /// Direct children of `parent` (`None` for top-level regions), in emission order.
    pub fn children(
        &self,
        parent: Option<RegionId>,
    ) -> impl Iterator<Item = (RegionId, &TaggedRegion)> {
        self.iter().filter(move |(_, r)| r.parent == parent)
    }

    /// Labels of the direct children of `parent`.
    pub fn child_labels(&self, parent: Option<RegionId>) -> Vec<&str> {
        self.children(parent).map(|(_, r)| r.label_str()).collect()
    }

    /// First region whose label starts with `prefix`.
    pub fn find(&self, prefix: &str) -> Option<(RegionId, &TaggedRegion)> {
        self.iter().find(|(_, r)| r.label_str().starts_with(prefix))
    }

    /// Every region whose label contains `needle`.
    pub fn find_all<'a>(
        &'a self,
        needle: &'a str,
    ) -> impl Iterator<Item = (RegionId, &'a TaggedRegion)> + 'a {
        self.iter().filter(move |(_, r)| r.label_str().contains(needle))
    }

    /// Regions that carry a decoded thumbnail.
    pub fn thumbnails(&self) -> impl Iterator<Item = (RegionId, &ThumbnailImage)> {
        self.iter()
            .filter_map(|(id, r)| r.thumbnail.as_ref().map(|t| (id, t)))
    }

    /// Check the structural invariants of a scan over a source of `source_size` bytes.
    ///
    /// - every parent was emitted before its child
    /// - `offset + length <= source_size`
    /// - siblings appear in non-decreasing offset order
    pub fn validate(&self, source_size: u64) -> Result<(), String> {
        let mut last_child_offset: Vec<Option<u64>> = vec![None; self.regions.len() + 1];

        for (i, region) in self.regions.iter().enumerate() {
            let id = i + 1;
            if region.end() > source_size {
                return Err(format!(
                    "region #{} '{}' ends at {} past source size {}",
                    id,
                    region.label_str(),
                    region.end(),
                    source_size
                ));
            }

            let slot = match region.parent {
                Some(parent) => {
                    if parent.get() as usize >= id {
                        return Err(format!(
                            "region #{} references parent {} that was not emitted before it",
                            id, parent
                        ));
                    }
                    parent.get() as usize
                }
                None => 0,
            };

            if let Some(prev) = last_child_offset[slot] {
                if region.offset < prev {
                    return Err(format!(
                        "region #{} '{}' at {} precedes its previous sibling at {}",
                        id,
                        region.label_str(),
                        region.offset,
                        prev
                    ));
                }
            }
            last_child_offset[slot] = Some(region.offset);
        }

        Ok(())
    }

    /// Indented text rendering of the region forest.
    pub fn render_tree(&self) -> String {
        let mut out = String::new();
        let mut depth = vec![0usize; self.regions.len()];
        for (i, region) in self.regions.iter().enumerate() {
            let level = region.parent.map_or(0, |p| depth[p.index()] + 1);
            depth[i] = level;

            let _ = write!(
                out,
                "{:indent$}{:08X} +{:<8} {}",
                "",
                region.offset,
                region.length,
                region.label_str(),
                indent = level * 2
            );
            if region.style.contains(StyleFlags::ERROR) {
                out.push_str("  [!]");
            }
            if let Some(thumb) = &region.thumbnail {
                let _ = write!(
                    out,
                    "  [thumbnail {}x{} {}-bit]",
                    thumb.width, thumb.height, thumb.bit_depth
                );
            }
            out.push('\n');
        }
        out
    }

    pub fn into_vec(self) -> Vec<TaggedRegion> {
        self.regions
    }
}

impl RegionSink for RegionList {
    fn add_region(
        &mut self,
        flags: StyleFlags,
        offset: u64,
        length: u32,
        label: Option<String>,
        parent: Option<RegionId>,
    ) -> RegionId {
        self.regions.push(TaggedRegion {
            offset,
            length,
            label,
            parent,
            style: flags,
            thumbnail: None,
        });
        RegionId::from_index(self.regions.len() - 1)
    }

    fn attach_thumbnail(&mut self, region: RegionId, thumbnail: ThumbnailImage) {
        if let Some(target) = self.regions.get_mut(region.index()) {
            target.thumbnail = Some(thumbnail);
        }
    }
}
