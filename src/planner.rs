use std::collections::HashMap;

use serde::Serialize;

use crate::domain::{ImageRef, WELL_PREFIX, WellCoordinate, WellId};
use crate::error::PlateError;

/// Images that land in a single well, in name order.
#[derive(Debug, Clone, Serialize)]
pub struct WellGroup {
    pub well: String,
    pub coordinate: WellCoordinate,
    pub images: Vec<ImageRef>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct WellPlan {
    pub wells: Vec<WellGroup>,
    pub fov_per_well: usize,
}

impl WellPlan {
    pub fn is_empty(&self) -> bool {
        self.wells.is_empty()
    }

    pub fn image_count(&self) -> usize {
        self.wells.iter().map(|group| group.images.len()).sum()
    }
}

/// Keep images whose name contains `filter`, then sort case-insensitively.
pub fn select_images(images: Vec<ImageRef>, filter: Option<&str>) -> Vec<ImageRef> {
    let mut selected = match filter {
        Some(filter) => images
            .into_iter()
            .filter(|image| image.name.contains(filter))
            .collect::<Vec<_>>(),
        None => images,
    };
    selected.sort_by_key(|image| image.name.to_lowercase());
    selected
}

/// Well token of an image name: everything before the first `_`, minus the
/// leading `Well`. `WellB3_t001.nd2` gives `B3`.
pub fn well_token(name: &str) -> Result<&str, PlateError> {
    let rest = name
        .strip_prefix(WELL_PREFIX)
        .ok_or_else(|| PlateError::NamingConvention {
            image: name.to_string(),
        })?;
    Ok(rest.split('_').next().unwrap_or(rest))
}

/// Group images by the well named in their file name and check that every
/// well holds the same number of fields of view. Two spellings of one
/// position (`A1`, `A01`) are rejected.
pub fn plan_wells(images: Vec<ImageRef>, filter: Option<&str>) -> Result<WellPlan, PlateError> {
    let images = select_images(images, filter);

    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Vec<ImageRef>> = HashMap::new();
    for image in images {
        let token = well_token(&image.name)?.to_string();
        groups
            .entry(token.clone())
            .or_insert_with(|| {
                order.push(token);
                Vec::new()
            })
            .push(image);
    }

    let mut fov_per_well = None;
    for images in groups.values() {
        match fov_per_well {
            None => fov_per_well = Some(images.len()),
            Some(expected) if expected != images.len() => {
                return Err(PlateError::InconsistentFov);
            }
            Some(_) => {}
        }
    }

    let mut wells = Vec::with_capacity(order.len());
    let mut positions: HashMap<WellCoordinate, String> = HashMap::new();
    for token in order {
        let well: WellId = token.parse()?;
        if let Some(first) = positions.insert(well.coordinate(), token.clone()) {
            return Err(PlateError::DuplicateWellPosition {
                first,
                second: token,
                position: well.coordinate().to_string(),
            });
        }
        let images = groups.remove(&token).unwrap_or_default();
        wells.push(WellGroup {
            well: well.as_str().to_string(),
            coordinate: well.coordinate(),
            images,
        });
    }

    Ok(WellPlan {
        wells,
        fov_per_well: fov_per_well.unwrap_or(0),
    })
}
