#![allow(dead_code)]

use nd2_plate::config::{ConfigLoader, ResolvedParams, ScriptParams};
use nd2_plate::domain::DataType;
use nd2_plate::store::{DatasetRecord, ImageRecord, LinkRecord, Snapshot, SnapshotStore};

/// Builds snapshots with datasets whose images get ids from 1000 upward.
#[derive(Default)]
pub struct SnapshotBuilder {
    snapshot: Snapshot,
    next_image: u64,
    next_link: u64,
}

impl SnapshotBuilder {
    pub fn new() -> Self {
        Self {
            snapshot: Snapshot::default(),
            next_image: 1000,
            next_link: 5000,
        }
    }

    pub fn dataset(self, id: u64, name: &str, images: &[&str]) -> Self {
        self.dataset_with_permission(id, name, images, true)
    }

    pub fn dataset_with_permission(
        mut self,
        id: u64,
        name: &str,
        images: &[&str],
        can_link: bool,
    ) -> Self {
        self.snapshot.datasets.push(DatasetRecord {
            id,
            name: name.to_string(),
            can_link,
        });
        for image in images {
            let image_id = self.next_image;
            self.next_image += 1;
            self.snapshot.images.push(ImageRecord {
                id: image_id,
                name: image.to_string(),
            });
            self.snapshot.dataset_image_links.push(LinkRecord {
                id: self.next_link,
                parent: id,
                child: image_id,
            });
            self.next_link += 1;
        }
        self
    }

    pub fn screen(mut self, id: u64, name: &str) -> Self {
        self.snapshot.screens.push(nd2_plate::store::ScreenRecord {
            id,
            name: name.to_string(),
            can_link: true,
        });
        self
    }

    pub fn build(self) -> Snapshot {
        self.snapshot
    }

    pub fn store(self) -> SnapshotStore {
        SnapshotStore::from_snapshot(self.snapshot)
    }
}

pub fn params(ids: &[u64]) -> ScriptParams {
    ScriptParams {
        data_type: Some(DataType::Dataset),
        ids: ids.to_vec(),
        ..ScriptParams::default()
    }
}

pub fn resolve(params: ScriptParams) -> ResolvedParams {
    ConfigLoader::resolve_params(params).unwrap()
}

pub fn image_id(snapshot: &Snapshot, name: &str) -> u64 {
    snapshot
        .images
        .iter()
        .find(|image| image.name == name)
        .map(|image| image.id)
        .unwrap()
}

pub fn in_dataset(snapshot: &Snapshot, dataset: u64, image: u64) -> bool {
    snapshot
        .dataset_image_links
        .iter()
        .any(|link| link.parent == dataset && link.child == image)
}

pub fn in_well(snapshot: &Snapshot, image: u64) -> bool {
    snapshot
        .wells
        .iter()
        .any(|well| well.samples.iter().any(|sample| sample.image == image))
}
