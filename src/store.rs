use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs;
use std::io::Write;
use std::sync::{Mutex, MutexGuard};

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use crate::domain::{ColumnNaming, DatasetRef, ImageRef, PlateRef, RowNaming, ScreenRef};
use crate::error::PlateError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Dataset,
    Screen,
}

impl ObjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::Dataset => "Dataset",
            ObjectKind::Screen => "Screen",
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPlate {
    pub name: String,
    pub column_naming: ColumnNaming,
    pub row_naming: RowNaming,
}

/// A well together with all of its samples, saved in one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewWell {
    pub plate_id: u64,
    pub row: u32,
    pub column: u32,
    pub image_ids: Vec<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeleteHandle {
    pub id: u64,
    pub dataset_id: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteStatus {
    Pending,
    Complete,
}

/// Requests the conversion issues against the image database.
pub trait OmeroStore: Send + Sync {
    fn get_dataset(&self, id: u64) -> Result<Option<DatasetRef>, PlateError>;
    /// Children of a dataset in link order.
    fn list_images(&self, dataset_id: u64) -> Result<Vec<ImageRef>, PlateError>;
    fn can_link(&self, kind: ObjectKind, id: u64) -> Result<bool, PlateError>;
    /// Number of distinct existing wells holding a sample of any of `image_ids`.
    fn count_wells_containing(&self, image_ids: &[u64]) -> Result<u64, PlateError>;
    fn get_screen(&self, id: u64) -> Result<Option<ScreenRef>, PlateError>;
    fn create_screen(&self, name: &str) -> Result<ScreenRef, PlateError>;
    fn create_plate(&self, plate: &NewPlate) -> Result<PlateRef, PlateError>;
    fn link_screen_plate(&self, screen_id: u64, plate_id: u64) -> Result<u64, PlateError>;
    /// Saves the well and its samples atomically: on error nothing persists.
    fn save_well(&self, well: &NewWell) -> Result<u64, PlateError>;
    fn dataset_image_links(&self, dataset_id: u64, image_id: u64) -> Result<Vec<u64>, PlateError>;
    fn delete_dataset_image_links(&self, link_ids: &[u64]) -> Result<(), PlateError>;
    fn queue_delete_dataset(&self, dataset_id: u64) -> Result<DeleteHandle, PlateError>;
    fn poll_delete(&self, handle: &DeleteHandle) -> Result<DeleteStatus, PlateError>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub next_id: u64,
    #[serde(default)]
    pub datasets: Vec<DatasetRecord>,
    #[serde(default)]
    pub images: Vec<ImageRecord>,
    #[serde(default)]
    pub dataset_image_links: Vec<LinkRecord>,
    #[serde(default)]
    pub screens: Vec<ScreenRecord>,
    #[serde(default)]
    pub plates: Vec<PlateRecord>,
    #[serde(default)]
    pub screen_plate_links: Vec<LinkRecord>,
    #[serde(default)]
    pub wells: Vec<WellRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetRecord {
    pub id: u64,
    pub name: String,
    #[serde(default = "default_true")]
    pub can_link: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageRecord {
    pub id: u64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkRecord {
    pub id: u64,
    pub parent: u64,
    pub child: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreenRecord {
    pub id: u64,
    pub name: String,
    #[serde(default = "default_true")]
    pub can_link: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlateRecord {
    pub id: u64,
    pub name: String,
    pub column_naming: ColumnNaming,
    pub row_naming: RowNaming,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WellRecord {
    pub id: u64,
    pub plate: u64,
    pub row: u32,
    pub column: u32,
    #[serde(default)]
    pub samples: Vec<WellSampleRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WellSampleRecord {
    pub id: u64,
    pub image: u64,
}

fn default_true() -> bool {
    true
}

impl Snapshot {
    fn allocate_id(&mut self) -> u64 {
        if self.next_id <= self.max_id() {
            self.next_id = self.max_id() + 1;
        }
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn max_id(&self) -> u64 {
        let ids = self
            .datasets
            .iter()
            .map(|d| d.id)
            .chain(self.images.iter().map(|i| i.id))
            .chain(self.dataset_image_links.iter().map(|l| l.id))
            .chain(self.screens.iter().map(|s| s.id))
            .chain(self.plates.iter().map(|p| p.id))
            .chain(self.screen_plate_links.iter().map(|l| l.id))
            .chain(self.wells.iter().map(|w| w.id))
            .chain(
                self.wells
                    .iter()
                    .flat_map(|w| w.samples.iter().map(|s| s.id)),
            );
        ids.max().unwrap_or(0)
    }
}

#[derive(Debug, Default)]
struct SnapshotState {
    data: Snapshot,
    pending_deletes: HashMap<u64, u32>,
}

/// In-memory image database backed by a JSON snapshot file.
///
/// Writes are visible immediately; [`SnapshotStore::save`] persists them.
/// Dataset deletions stay pending for `delete_latency` polls before they
/// complete, which mimics the server-side delete queue.
#[derive(Debug)]
pub struct SnapshotStore {
    path: Option<Utf8PathBuf>,
    state: Mutex<SnapshotState>,
    delete_latency: u32,
}

impl SnapshotStore {
    pub fn open(path: &Utf8Path) -> Result<Self, PlateError> {
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|_| PlateError::SnapshotRead(path.to_path_buf()))?;
        let data: Snapshot = serde_json::from_str(&content)
            .map_err(|err| PlateError::SnapshotParse(err.to_string()))?;
        let mut store = Self::from_snapshot(data);
        store.path = Some(path.to_path_buf());
        Ok(store)
    }

    pub fn from_snapshot(data: Snapshot) -> Self {
        Self {
            path: None,
            state: Mutex::new(SnapshotState {
                data,
                pending_deletes: HashMap::new(),
            }),
            delete_latency: 0,
        }
    }

    pub fn with_delete_latency(mut self, polls: u32) -> Self {
        self.delete_latency = polls;
        self
    }

    pub fn snapshot(&self) -> Result<Snapshot, PlateError> {
        Ok(self.lock()?.data.clone())
    }

    /// Write the current state back to the snapshot file, if there is one.
    pub fn save(&self) -> Result<(), PlateError> {
        let Some(path) = self.path.as_deref() else {
            return Ok(());
        };
        let content = {
            let state = self.lock()?;
            serde_json::to_vec_pretty(&state.data)
                .map_err(|err| PlateError::Filesystem(err.to_string()))?
        };
        write_atomic(path, &content)
    }

    fn lock(&self) -> Result<MutexGuard<'_, SnapshotState>, PlateError> {
        self.state
            .lock()
            .map_err(|_| PlateError::Store("snapshot state poisoned".to_string()))
    }
}

fn write_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), PlateError> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_str().is_empty() => parent.to_path_buf(),
        _ => Utf8PathBuf::from("."),
    };
    fs::create_dir_all(parent.as_std_path())
        .map_err(|err| PlateError::Filesystem(err.to_string()))?;
    let mut temp = tempfile::Builder::new()
        .prefix("nd2-plate-snapshot")
        .tempfile_in(parent.as_std_path())
        .map_err(|err| PlateError::Filesystem(err.to_string()))?;
    temp.write_all(content)
        .map_err(|err| PlateError::Filesystem(err.to_string()))?;
    temp.write_all(b"\n")
        .map_err(|err| PlateError::Filesystem(err.to_string()))?;
    temp.persist(path.as_std_path())
        .map_err(|err| PlateError::Filesystem(err.to_string()))?;
    Ok(())
}

impl OmeroStore for SnapshotStore {
    fn get_dataset(&self, id: u64) -> Result<Option<DatasetRef>, PlateError> {
        let state = self.lock()?;
        Ok(state
            .data
            .datasets
            .iter()
            .find(|dataset| dataset.id == id)
            .map(|dataset| DatasetRef {
                id: dataset.id,
                name: dataset.name.clone(),
            }))
    }

    fn list_images(&self, dataset_id: u64) -> Result<Vec<ImageRef>, PlateError> {
        let state = self.lock()?;
        let data = &state.data;
        let images = data
            .dataset_image_links
            .iter()
            .filter(|link| link.parent == dataset_id)
            .filter_map(|link| data.images.iter().find(|image| image.id == link.child))
            .map(|image| ImageRef::new(image.id, image.name.clone()))
            .collect();
        Ok(images)
    }

    fn can_link(&self, kind: ObjectKind, id: u64) -> Result<bool, PlateError> {
        let state = self.lock()?;
        let allowed = match kind {
            ObjectKind::Dataset => state
                .data
                .datasets
                .iter()
                .find(|dataset| dataset.id == id)
                .map(|dataset| dataset.can_link),
            ObjectKind::Screen => state
                .data
                .screens
                .iter()
                .find(|screen| screen.id == id)
                .map(|screen| screen.can_link),
        };
        Ok(allowed.unwrap_or(false))
    }

    fn count_wells_containing(&self, image_ids: &[u64]) -> Result<u64, PlateError> {
        let state = self.lock()?;
        let wanted = image_ids.iter().copied().collect::<HashSet<_>>();
        let count = state
            .data
            .wells
            .iter()
            .filter(|well| {
                well.samples
                    .iter()
                    .any(|sample| wanted.contains(&sample.image))
            })
            .count();
        Ok(count as u64)
    }

    fn get_screen(&self, id: u64) -> Result<Option<ScreenRef>, PlateError> {
        let state = self.lock()?;
        Ok(state
            .data
            .screens
            .iter()
            .find(|screen| screen.id == id)
            .map(|screen| ScreenRef {
                id: screen.id,
                name: screen.name.clone(),
            }))
    }

    fn create_screen(&self, name: &str) -> Result<ScreenRef, PlateError> {
        let mut state = self.lock()?;
        let id = state.data.allocate_id();
        state.data.screens.push(ScreenRecord {
            id,
            name: name.to_string(),
            can_link: true,
        });
        Ok(ScreenRef {
            id,
            name: name.to_string(),
        })
    }

    fn create_plate(&self, plate: &NewPlate) -> Result<PlateRef, PlateError> {
        let mut state = self.lock()?;
        let id = state.data.allocate_id();
        state.data.plates.push(PlateRecord {
            id,
            name: plate.name.clone(),
            column_naming: plate.column_naming,
            row_naming: plate.row_naming,
        });
        Ok(PlateRef {
            id,
            name: plate.name.clone(),
        })
    }

    fn link_screen_plate(&self, screen_id: u64, plate_id: u64) -> Result<u64, PlateError> {
        let mut state = self.lock()?;
        if !state.data.screens.iter().any(|screen| screen.id == screen_id) {
            return Err(PlateError::Store(format!("no such screen: {screen_id}")));
        }
        if !state.data.plates.iter().any(|plate| plate.id == plate_id) {
            return Err(PlateError::Store(format!("no such plate: {plate_id}")));
        }
        let id = state.data.allocate_id();
        state.data.screen_plate_links.push(LinkRecord {
            id,
            parent: screen_id,
            child: plate_id,
        });
        Ok(id)
    }

    fn save_well(&self, well: &NewWell) -> Result<u64, PlateError> {
        let mut state = self.lock()?;
        if !state.data.plates.iter().any(|plate| plate.id == well.plate_id) {
            return Err(PlateError::Store(format!("no such plate: {}", well.plate_id)));
        }
        if let Some(missing) = well
            .image_ids
            .iter()
            .find(|id| !state.data.images.iter().any(|image| image.id == **id))
        {
            return Err(PlateError::Store(format!("no such image: {missing}")));
        }
        if state.data.wells.iter().any(|existing| {
            existing.plate == well.plate_id
                && existing.row == well.row
                && existing.column == well.column
        }) {
            return Err(PlateError::Store(format!(
                "plate {} already has a well at row {}, column {}",
                well.plate_id, well.row, well.column
            )));
        }
        let id = state.data.allocate_id();
        let mut samples = Vec::with_capacity(well.image_ids.len());
        for image in &well.image_ids {
            samples.push(WellSampleRecord {
                id: state.data.allocate_id(),
                image: *image,
            });
        }
        state.data.wells.push(WellRecord {
            id,
            plate: well.plate_id,
            row: well.row,
            column: well.column,
            samples,
        });
        Ok(id)
    }

    fn dataset_image_links(&self, dataset_id: u64, image_id: u64) -> Result<Vec<u64>, PlateError> {
        let state = self.lock()?;
        Ok(state
            .data
            .dataset_image_links
            .iter()
            .filter(|link| link.parent == dataset_id && link.child == image_id)
            .map(|link| link.id)
            .collect())
    }

    fn delete_dataset_image_links(&self, link_ids: &[u64]) -> Result<(), PlateError> {
        let mut state = self.lock()?;
        state
            .data
            .dataset_image_links
            .retain(|link| !link_ids.contains(&link.id));
        Ok(())
    }

    fn queue_delete_dataset(&self, dataset_id: u64) -> Result<DeleteHandle, PlateError> {
        let mut state = self.lock()?;
        if !state.data.datasets.iter().any(|d| d.id == dataset_id) {
            return Err(PlateError::DatasetNotFound(dataset_id));
        }
        let id = state.data.allocate_id();
        state.pending_deletes.insert(id, self.delete_latency);
        Ok(DeleteHandle { id, dataset_id })
    }

    fn poll_delete(&self, handle: &DeleteHandle) -> Result<DeleteStatus, PlateError> {
        let mut state = self.lock()?;
        let remaining = match state.pending_deletes.get_mut(&handle.id) {
            Some(remaining) => remaining,
            None => return Ok(DeleteStatus::Complete),
        };
        if *remaining > 0 {
            *remaining -= 1;
            return Ok(DeleteStatus::Pending);
        }
        state.pending_deletes.remove(&handle.id);
        // Images are kept, only the container and its links go.
        state.data.datasets.retain(|d| d.id != handle.dataset_id);
        state
            .data
            .dataset_image_links
            .retain(|link| link.parent != handle.dataset_id);
        Ok(DeleteStatus::Complete)
    }
}
