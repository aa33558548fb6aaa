use serde::Serialize;
use tracing::{debug, info, warn};

use crate::domain::{ColumnNaming, DatasetRef, ImageRef, PlateRef, RowNaming, ScreenRef, ScreenSpec};
use crate::error::PlateError;
use crate::planner::{WellGroup, WellPlan};
use crate::store::{DeleteHandle, NewPlate, NewWell, ObjectKind, OmeroStore};

#[derive(Debug, Clone, Copy)]
pub struct ProvisionerOptions {
    /// Unlink placed images from their source dataset.
    pub remove_from_dataset: bool,
    /// Queue deletion of a source dataset once every one of its images has
    /// been placed. Off unless asked for.
    pub delete_empty_dataset: bool,
}

impl Default for ProvisionerOptions {
    fn default() -> Self {
        Self {
            remove_from_dataset: true,
            delete_empty_dataset: false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ResolvedScreen {
    pub screen: ScreenRef,
    pub created: bool,
    pub can_link: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct DatasetOutcome {
    pub dataset: DatasetRef,
    pub plate: PlateRef,
    pub linked: bool,
    pub wells_created: usize,
    pub wells_failed: usize,
    pub images_placed: usize,
    pub images_detached: usize,
    #[serde(skip)]
    pub delete_handle: Option<DeleteHandle>,
}

pub struct Provisioner<'a, S: OmeroStore + ?Sized> {
    store: &'a S,
    options: ProvisionerOptions,
}

impl<'a, S: OmeroStore + ?Sized> Provisioner<'a, S> {
    pub fn new(store: &'a S, options: ProvisionerOptions) -> Self {
        Self { store, options }
    }

    /// Plates converted from ND2 runs always use numbered columns and
    /// lettered rows. Duplicate names are allowed.
    pub fn create_plate(&self, name: &str) -> Result<PlateRef, PlateError> {
        let plate = self.store.create_plate(&NewPlate {
            name: name.to_string(),
            column_naming: ColumnNaming::Number,
            row_naming: RowNaming::Letter,
        })?;
        info!(plate = plate.id, name = %plate.name, "created plate");
        Ok(plate)
    }

    /// A numeric spec naming an existing screen reuses it; anything else
    /// creates a screen named after the spec text.
    pub fn resolve_or_create_screen(
        &self,
        spec: Option<&ScreenSpec>,
    ) -> Result<Option<ResolvedScreen>, PlateError> {
        let Some(spec) = spec else {
            return Ok(None);
        };
        if let Some(id) = spec.screen_id() {
            if let Some(screen) = self.store.get_screen(id)? {
                let can_link = self.store.can_link(ObjectKind::Screen, screen.id)?;
                debug!(screen = screen.id, can_link, "reusing existing screen");
                return Ok(Some(ResolvedScreen {
                    screen,
                    created: false,
                    can_link,
                }));
            }
        }
        let screen = self.store.create_screen(spec.as_str())?;
        let can_link = self.store.can_link(ObjectKind::Screen, screen.id)?;
        info!(screen = screen.id, name = %screen.name, "created screen");
        Ok(Some(ResolvedScreen {
            screen,
            created: true,
            can_link,
        }))
    }

    /// Returns whether a link was made. Missing permission is not an error.
    pub fn link_plate_to_screen(
        &self,
        plate: &PlateRef,
        screen: &ResolvedScreen,
    ) -> Result<bool, PlateError> {
        if !screen.can_link {
            warn!(
                plate = plate.id,
                screen = screen.screen.id,
                "no link permission on screen, plate left unattached"
            );
            return Ok(false);
        }
        self.store.link_screen_plate(screen.screen.id, plate.id)?;
        Ok(true)
    }

    /// Create one well holding every image of `group`. A store failure
    /// abandons the whole well and is reported as `false`.
    pub fn create_well_and_assign(&self, plate_id: u64, group: &WellGroup) -> bool {
        let well = NewWell {
            plate_id,
            row: group.coordinate.row,
            column: group.coordinate.column,
            image_ids: group.images.iter().map(|image| image.id).collect(),
        };
        match self.store.save_well(&well) {
            Ok(well_id) => {
                debug!(
                    well = well_id,
                    position = %group.coordinate,
                    fov = group.images.len(),
                    "created well"
                );
                true
            }
            Err(err) => {
                let err = PlateError::WellCreation {
                    row: well.row,
                    column: well.column,
                    message: err.to_string(),
                };
                warn!(plate = plate_id, position = %group.coordinate, "{err}");
                false
            }
        }
    }

    /// Remove each image's membership in `dataset_id`. Returns how many
    /// links were removed.
    pub fn detach_images(&self, images: &[ImageRef], dataset_id: u64) -> Result<usize, PlateError> {
        let mut removed = 0;
        for image in images {
            let links = self.store.dataset_image_links(dataset_id, image.id)?;
            if links.is_empty() {
                continue;
            }
            self.store.delete_dataset_image_links(&links)?;
            removed += links.len();
        }
        Ok(removed)
    }

    /// Create the plate for one dataset and fill it according to `plan`.
    ///
    /// `total_images` is the dataset's child count before filtering; the
    /// dataset is only queued for deletion when every one of them was placed.
    pub fn provision_dataset(
        &self,
        dataset: &DatasetRef,
        plan: &WellPlan,
        total_images: usize,
        screen: Option<&ResolvedScreen>,
    ) -> Result<DatasetOutcome, PlateError> {
        let plate = self.create_plate(&dataset.name)?;
        let linked = match screen {
            Some(screen) => self.link_plate_to_screen(&plate, screen)?,
            None => false,
        };

        let mut outcome = DatasetOutcome {
            dataset: dataset.clone(),
            plate,
            linked,
            wells_created: 0,
            wells_failed: 0,
            images_placed: 0,
            images_detached: 0,
            delete_handle: None,
        };

        for group in &plan.wells {
            if !self.create_well_and_assign(outcome.plate.id, group) {
                outcome.wells_failed += 1;
                continue;
            }
            outcome.wells_created += 1;
            outcome.images_placed += group.images.len();
            if self.options.remove_from_dataset {
                outcome.images_detached += self.detach_images(&group.images, dataset.id)?;
            }
        }

        if self.options.delete_empty_dataset
            && self.options.remove_from_dataset
            && outcome.images_placed == total_images
        {
            let handle = self.store.queue_delete_dataset(dataset.id)?;
            info!(dataset = dataset.id, "queued deletion of emptied dataset");
            outcome.delete_handle = Some(handle);
        }

        Ok(outcome)
    }
}
