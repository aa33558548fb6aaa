mod common;

use nd2_plate::app::App;
use nd2_plate::domain::{DatasetRef, ImageRef, PlateRef, ScreenRef, ScreenSpec};
use nd2_plate::error::PlateError;
use nd2_plate::output::JsonOutput;
use nd2_plate::planner::plan_wells;
use nd2_plate::provisioner::{Provisioner, ProvisionerOptions};
use nd2_plate::store::{
    DeleteHandle, DeleteStatus, NewPlate, NewWell, ObjectKind, OmeroStore, SnapshotStore,
};

use common::{SnapshotBuilder, image_id, in_dataset, params, resolve};

/// Delegates to a snapshot store but refuses wells in one row.
struct RowRejectingStore {
    inner: SnapshotStore,
    reject_row: u32,
}

impl OmeroStore for RowRejectingStore {
    fn get_dataset(&self, id: u64) -> Result<Option<DatasetRef>, PlateError> {
        self.inner.get_dataset(id)
    }

    fn list_images(&self, dataset_id: u64) -> Result<Vec<ImageRef>, PlateError> {
        self.inner.list_images(dataset_id)
    }

    fn can_link(&self, kind: ObjectKind, id: u64) -> Result<bool, PlateError> {
        self.inner.can_link(kind, id)
    }

    fn count_wells_containing(&self, image_ids: &[u64]) -> Result<u64, PlateError> {
        self.inner.count_wells_containing(image_ids)
    }

    fn get_screen(&self, id: u64) -> Result<Option<ScreenRef>, PlateError> {
        self.inner.get_screen(id)
    }

    fn create_screen(&self, name: &str) -> Result<ScreenRef, PlateError> {
        self.inner.create_screen(name)
    }

    fn create_plate(&self, plate: &NewPlate) -> Result<PlateRef, PlateError> {
        self.inner.create_plate(plate)
    }

    fn link_screen_plate(&self, screen_id: u64, plate_id: u64) -> Result<u64, PlateError> {
        self.inner.link_screen_plate(screen_id, plate_id)
    }

    fn save_well(&self, well: &NewWell) -> Result<u64, PlateError> {
        if well.row == self.reject_row {
            return Err(PlateError::Store("well sample rejected".to_string()));
        }
        self.inner.save_well(well)
    }

    fn dataset_image_links(&self, dataset_id: u64, image_id: u64) -> Result<Vec<u64>, PlateError> {
        self.inner.dataset_image_links(dataset_id, image_id)
    }

    fn delete_dataset_image_links(&self, link_ids: &[u64]) -> Result<(), PlateError> {
        self.inner.delete_dataset_image_links(link_ids)
    }

    fn queue_delete_dataset(&self, dataset_id: u64) -> Result<DeleteHandle, PlateError> {
        self.inner.queue_delete_dataset(dataset_id)
    }

    fn poll_delete(&self, handle: &DeleteHandle) -> Result<DeleteStatus, PlateError> {
        self.inner.poll_delete(handle)
    }
}

#[test]
fn failed_well_is_skipped_and_images_stay_in_dataset() {
    let store = RowRejectingStore {
        inner: SnapshotBuilder::new()
            .dataset(1, "run-1", &["WellA1_1.nd2", "WellB1_1.nd2", "WellC1_1.nd2"])
            .store(),
        reject_row: 1,
    };
    let app = App::new(store);
    let mut script = params(&[1]);
    script.delete_empty_dataset = Some(true);

    let report = app.convert(&resolve(script), &JsonOutput).unwrap();
    let outcome = &report.plates[0];
    assert_eq!(outcome.wells_created, 2);
    assert_eq!(outcome.wells_failed, 1);
    assert_eq!(outcome.images_placed, 2);
    assert_eq!(outcome.images_detached, 2);
    // Not every image was placed, so the dataset survives.
    assert!(report.deletions.is_empty());

    let snapshot = app.store().inner.snapshot().unwrap();
    assert_eq!(snapshot.wells.len(), 2);
    assert!(snapshot.wells.iter().all(|well| well.row != 1));
    let b1 = image_id(&snapshot, "WellB1_1.nd2");
    assert!(in_dataset(&snapshot, 1, b1));
}

#[test]
fn kept_images_stay_linked_when_well_fails() {
    let store = RowRejectingStore {
        inner: SnapshotBuilder::new()
            .dataset(1, "run-1", &["WellA1_1.nd2", "WellB1_1.nd2"])
            .store(),
        reject_row: 1,
    };
    let app = App::new(store);
    let mut script = params(&[1]);
    script.remove_from_dataset = Some(false);

    let report = app.convert(&resolve(script), &JsonOutput).unwrap();
    let outcome = &report.plates[0];
    assert_eq!(outcome.wells_created, 1);
    assert_eq!(outcome.wells_failed, 1);
    assert_eq!(outcome.images_detached, 0);

    let snapshot = app.store().inner.snapshot().unwrap();
    assert_eq!(snapshot.wells.len(), 1);
    for name in ["WellA1_1.nd2", "WellB1_1.nd2"] {
        assert!(in_dataset(&snapshot, 1, image_id(&snapshot, name)));
    }
}

#[test]
fn create_well_reports_failure_without_partial_well() {
    let store = RowRejectingStore {
        inner: SnapshotBuilder::new()
            .dataset(1, "run-1", &["WellA1_1.nd2", "WellA1_2.nd2"])
            .store(),
        reject_row: 0,
    };
    let provisioner = Provisioner::new(&store, ProvisionerOptions::default());
    let plate = provisioner.create_plate("run-1").unwrap();
    let plan = plan_wells(store.list_images(1).unwrap(), None).unwrap();

    assert!(!provisioner.create_well_and_assign(plate.id, &plan.wells[0]));
    assert!(store.inner.snapshot().unwrap().wells.is_empty());
}

#[test]
fn screen_without_link_permission_leaves_plate_unattached() {
    let mut snapshot = SnapshotBuilder::new()
        .dataset(1, "run-1", &["WellA1_1.nd2"])
        .screen(5, "Locked")
        .build();
    snapshot.screens[0].can_link = false;
    let store = SnapshotStore::from_snapshot(snapshot);
    let provisioner = Provisioner::new(&store, ProvisionerOptions::default());

    let screen = provisioner
        .resolve_or_create_screen(ScreenSpec::new("5").as_ref())
        .unwrap()
        .unwrap();
    assert!(!screen.created);
    assert!(!screen.can_link);

    let plate = provisioner.create_plate("run-1").unwrap();
    assert!(!provisioner.link_plate_to_screen(&plate, &screen).unwrap());
    assert!(store.snapshot().unwrap().screen_plate_links.is_empty());
}

#[test]
fn no_screen_spec_means_no_screen() {
    let store = SnapshotBuilder::new().store();
    let provisioner = Provisioner::new(&store, ProvisionerOptions::default());
    assert!(provisioner.resolve_or_create_screen(None).unwrap().is_none());
    assert!(store.snapshot().unwrap().screens.is_empty());
}

#[test]
fn duplicate_plate_names_are_allowed() {
    let store = SnapshotBuilder::new().store();
    let provisioner = Provisioner::new(&store, ProvisionerOptions::default());
    let first = provisioner.create_plate("same").unwrap();
    let second = provisioner.create_plate("same").unwrap();
    assert_ne!(first.id, second.id);
}

#[test]
fn detach_only_touches_given_dataset() {
    let mut snapshot = SnapshotBuilder::new()
        .dataset(1, "run-1", &["WellA1_1.nd2"])
        .dataset(2, "other", &[])
        .build();
    let image = image_id(&snapshot, "WellA1_1.nd2");
    snapshot
        .dataset_image_links
        .push(nd2_plate::store::LinkRecord {
            id: 9000,
            parent: 2,
            child: image,
        });
    let store = SnapshotStore::from_snapshot(snapshot);
    let provisioner = Provisioner::new(&store, ProvisionerOptions::default());

    let removed = provisioner
        .detach_images(&[ImageRef::new(image, "WellA1_1.nd2")], 1)
        .unwrap();
    assert_eq!(removed, 1);

    let snapshot = store.snapshot().unwrap();
    assert!(!in_dataset(&snapshot, 1, image));
    assert!(in_dataset(&snapshot, 2, image));
}
