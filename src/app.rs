use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use crate::config::ResolvedParams;
use crate::deletion::{DeleteOutcome, DeletePolicy, wait_for_delete};
use crate::domain::{DatasetRef, PlateRef, ScreenRef};
use crate::error::PlateError;
use crate::planner::{WellPlan, plan_wells};
use crate::provisioner::{DatasetOutcome, Provisioner, ResolvedScreen};
use crate::store::{ObjectKind, OmeroStore};

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum NewObject {
    Screen(ScreenRef),
    Plate(PlateRef),
}

#[derive(Debug, Clone, Serialize)]
pub struct DeletionResult {
    pub dataset_id: u64,
    pub outcome: DeleteOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConversionReport {
    pub message: String,
    pub new_object: Option<NewObject>,
    pub missing: Vec<u64>,
    pub excluded: Vec<u64>,
    pub permission_denied: Vec<u64>,
    pub screen: Option<ResolvedScreen>,
    pub plates: Vec<DatasetOutcome>,
    pub deletions: Vec<DeletionResult>,
    pub validation_error: Option<String>,
    pub completed_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DatasetPlan {
    pub dataset: DatasetRef,
    pub total_images: usize,
    pub plan: Option<WellPlan>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlanReport {
    pub message: String,
    pub missing: Vec<u64>,
    pub excluded: Vec<u64>,
    pub permission_denied: Vec<u64>,
    pub datasets: Vec<DatasetPlan>,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

/// Datasets that survived lookup and the pre-checks, plus the summary text
/// describing what was dropped.
#[derive(Debug, Default)]
struct Selection {
    datasets: Vec<DatasetRef>,
    missing: Vec<u64>,
    excluded: Vec<u64>,
    permission_denied: Vec<u64>,
    message: String,
}

pub struct App<S: OmeroStore> {
    store: S,
    delete_policy: DeletePolicy,
    cancel: Arc<AtomicBool>,
}

impl<S: OmeroStore> App<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            delete_policy: DeletePolicy::default(),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_delete_policy(mut self, policy: DeletePolicy) -> Self {
        self.delete_policy = policy;
        self
    }

    /// Raising this flag stops any wait on a queued dataset deletion; the
    /// deletion itself stays queued on the server.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Convert every requested dataset into a plate.
    ///
    /// A dataset that fails name or FOV validation stops the batch: its error
    /// becomes the whole message. Plates made for earlier datasets remain.
    pub fn convert(
        &self,
        params: &ResolvedParams,
        sink: &dyn ProgressSink,
    ) -> Result<ConversionReport, PlateError> {
        let selection = self.select_datasets(&params.ids, sink)?;
        let mut report = ConversionReport {
            message: selection.message.clone(),
            new_object: None,
            missing: selection.missing.clone(),
            excluded: selection.excluded.clone(),
            permission_denied: selection.permission_denied.clone(),
            screen: None,
            plates: Vec::new(),
            deletions: Vec::new(),
            validation_error: None,
            completed_at: String::new(),
        };
        if selection.datasets.is_empty() {
            report.completed_at = iso_timestamp();
            return Ok(report);
        }

        let provisioner = Provisioner::new(&self.store, params.provisioner_options());
        sink.event(ProgressEvent {
            message: "phase=Screen; resolving screen".to_string(),
            elapsed: None,
        });
        report.screen = provisioner.resolve_or_create_screen(params.screen.as_ref())?;

        for dataset in &selection.datasets {
            let started = std::time::Instant::now();
            sink.event(ProgressEvent {
                message: format!("phase=Plan; dataset {} ({})", dataset.id, dataset.name),
                elapsed: None,
            });
            let images = self.store.list_images(dataset.id)?;
            let total_images = images.len();
            let plan = match plan_wells(images, params.filter_names.as_deref()) {
                Ok(plan) => plan,
                Err(err) if err.is_validation() => {
                    warn!(dataset = dataset.id, "{err}");
                    report.message = err.to_string();
                    report.validation_error = Some(err.to_string());
                    report.completed_at = iso_timestamp();
                    return Ok(report);
                }
                Err(err) => return Err(err),
            };

            sink.event(ProgressEvent {
                message: format!(
                    "phase=Provision; {} wells x {} FOV",
                    plan.wells.len(),
                    plan.fov_per_well
                ),
                elapsed: None,
            });
            let outcome =
                provisioner.provision_dataset(dataset, &plan, total_images, report.screen.as_ref())?;
            sink.event(ProgressEvent {
                message: format!(
                    "phase=Done; plate {} wells_created={} wells_failed={}",
                    outcome.plate.id, outcome.wells_created, outcome.wells_failed
                ),
                elapsed: Some(started.elapsed()),
            });
            report.plates.push(outcome);
        }

        for outcome in &report.plates {
            let Some(handle) = outcome.delete_handle else {
                continue;
            };
            sink.event(ProgressEvent {
                message: format!("phase=Delete; waiting for dataset {}", handle.dataset_id),
                elapsed: None,
            });
            let result = wait_for_delete(&self.store, &handle, self.delete_policy, &self.cancel)?;
            report.deletions.push(DeletionResult {
                dataset_id: handle.dataset_id,
                outcome: result,
            });
        }

        report.new_object = match (&report.screen, report.plates.first()) {
            (Some(screen), _) if screen.created => Some(NewObject::Screen(screen.screen.clone())),
            (_, Some(first)) => Some(NewObject::Plate(first.plate.clone())),
            _ => None,
        };
        let summary = summary_message(&report);
        report.message.push_str(&summary);
        report.completed_at = iso_timestamp();
        info!(plates = report.plates.len(), "{}", report.message);
        Ok(report)
    }

    /// Run lookup, pre-checks and planning without writing anything.
    pub fn plan(
        &self,
        params: &ResolvedParams,
        sink: &dyn ProgressSink,
    ) -> Result<PlanReport, PlateError> {
        let selection = self.select_datasets(&params.ids, sink)?;
        let mut datasets = Vec::with_capacity(selection.datasets.len());
        for dataset in selection.datasets {
            sink.event(ProgressEvent {
                message: format!("phase=Plan; dataset {} ({})", dataset.id, dataset.name),
                elapsed: None,
            });
            let images = self.store.list_images(dataset.id)?;
            let total_images = images.len();
            let (plan, error) = match plan_wells(images, params.filter_names.as_deref()) {
                Ok(plan) => (Some(plan), None),
                Err(err) if err.is_validation() => (None, Some(err.to_string())),
                Err(err) => return Err(err),
            };
            datasets.push(DatasetPlan {
                dataset,
                total_images,
                plan,
                error,
            });
        }
        Ok(PlanReport {
            message: selection.message,
            missing: selection.missing,
            excluded: selection.excluded,
            permission_denied: selection.permission_denied,
            datasets,
        })
    }

    /// True when any image of the dataset already sits in a well.
    pub fn has_images_linked_to_well(&self, dataset_id: u64) -> Result<bool, PlateError> {
        let image_ids = self
            .store
            .list_images(dataset_id)?
            .into_iter()
            .map(|image| image.id)
            .collect::<Vec<_>>();
        if image_ids.is_empty() {
            return Ok(false);
        }
        Ok(self.store.count_wells_containing(&image_ids)? > 0)
    }

    fn select_datasets(
        &self,
        ids: &[u64],
        sink: &dyn ProgressSink,
    ) -> Result<Selection, PlateError> {
        sink.event(ProgressEvent {
            message: format!("phase=Resolve; looking up {} dataset(s)", ids.len()),
            elapsed: None,
        });
        let mut selection = Selection::default();

        let mut found = Vec::new();
        for id in ids {
            match self.store.get_dataset(*id)? {
                Some(dataset) => found.push(dataset),
                None => {
                    warn!(dataset = *id, "dataset not found, skipping");
                    selection.missing.push(*id);
                }
            }
        }

        let requested = found.len();
        let mut unplated = Vec::with_capacity(found.len());
        for dataset in found {
            if self.has_images_linked_to_well(dataset.id)? {
                info!(dataset = dataset.id, "dataset already has images in wells, excluding");
                selection.excluded.push(dataset.id);
            } else {
                unplated.push(dataset);
            }
        }
        if !selection.excluded.is_empty() {
            selection.message.push_str(&format!(
                "Excluded {} out of {} dataset(s). ",
                selection.excluded.len(),
                requested
            ));
        }
        if unplated.is_empty() {
            return Ok(selection);
        }

        for dataset in unplated {
            if self.store.can_link(ObjectKind::Dataset, dataset.id)? {
                selection.datasets.push(dataset);
            } else {
                let denied = PlateError::Permission {
                    kind: ObjectKind::Dataset.as_str(),
                    id: dataset.id,
                };
                warn!("{denied}");
                selection.permission_denied.push(dataset.id);
            }
        }
        if !selection.permission_denied.is_empty() {
            let ids = selection
                .permission_denied
                .iter()
                .map(|id| id.to_string())
                .collect::<Vec<_>>()
                .join(",");
            selection.message.push_str(&format!(
                "You do not have the permissions to add the images from the dataset(s): {ids}."
            ));
        }
        Ok(selection)
    }
}

fn summary_message(report: &ConversionReport) -> String {
    let mut message = String::new();
    if let Some(screen) = report.screen.as_ref().filter(|screen| screen.created) {
        message.push_str(&format!("New screen created: {}.", screen.screen.name));
    }
    match report.plates.as_slice() {
        [] => message.push_str("No plate created."),
        plates => {
            if let [only] = plates {
                message.push_str(&format!(" New plate created: {}", only.plate.name));
            } else {
                message.push_str(&format!(" {} plates created", plates.len()));
            }
            if plates.iter().all(|outcome| outcome.linked) {
                message.push('.');
            } else {
                message.push_str(" but could not be attached.");
            }
        }
    }
    message
}

fn iso_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}
