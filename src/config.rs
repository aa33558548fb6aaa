use std::fs;

use camino::Utf8Path;
use serde::{Deserialize, Serialize};

use crate::domain::{DataType, ScreenSpec};
use crate::error::PlateError;
use crate::provisioner::ProvisionerOptions;

/// Script parameters as supplied by the caller, keyed by their script names.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ScriptParams {
    #[serde(rename = "Data_Type", default)]
    pub data_type: Option<DataType>,
    #[serde(rename = "IDs", default)]
    pub ids: Vec<u64>,
    #[serde(rename = "Filter_Names", default)]
    pub filter_names: Option<String>,
    #[serde(rename = "Screen", default)]
    pub screen: Option<String>,
    #[serde(rename = "Remove_From_Dataset", default)]
    pub remove_from_dataset: Option<bool>,
    #[serde(rename = "Delete_Empty_Dataset", default)]
    pub delete_empty_dataset: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct ResolvedParams {
    pub data_type: DataType,
    pub ids: Vec<u64>,
    pub filter_names: Option<String>,
    pub screen: Option<ScreenSpec>,
    pub remove_from_dataset: bool,
    pub delete_empty_dataset: bool,
}

impl ResolvedParams {
    pub fn provisioner_options(&self) -> ProvisionerOptions {
        ProvisionerOptions {
            remove_from_dataset: self.remove_from_dataset,
            delete_empty_dataset: self.delete_empty_dataset,
        }
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn load(path: &Utf8Path) -> Result<ScriptParams, PlateError> {
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|_| PlateError::ConfigRead(path.to_path_buf()))?;
        serde_json::from_str(&content).map_err(|err| PlateError::ConfigParse(err.to_string()))
    }

    pub fn resolve(path: &Utf8Path) -> Result<ResolvedParams, PlateError> {
        Self::resolve_params(Self::load(path)?)
    }

    pub fn resolve_params(params: ScriptParams) -> Result<ResolvedParams, PlateError> {
        let data_type = params
            .data_type
            .ok_or_else(|| PlateError::Configuration("Data_Type is required".to_string()))?;
        if params.ids.is_empty() {
            return Err(PlateError::Configuration(
                "IDs must name at least one dataset".to_string(),
            ));
        }

        let mut ids = Vec::with_capacity(params.ids.len());
        for id in params.ids {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }

        Ok(ResolvedParams {
            data_type,
            ids,
            filter_names: params.filter_names.filter(|value| !value.is_empty()),
            screen: params.screen.as_deref().and_then(ScreenSpec::new),
            remove_from_dataset: params.remove_from_dataset.unwrap_or(true),
            delete_empty_dataset: params.delete_empty_dataset.unwrap_or(false),
        })
    }
}
