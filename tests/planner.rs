use assert_matches::assert_matches;

use nd2_plate::domain::{ImageRef, WellCoordinate};
use nd2_plate::error::PlateError;
use nd2_plate::planner::plan_wells;

fn images(names: &[&str]) -> Vec<ImageRef> {
    names
        .iter()
        .enumerate()
        .map(|(idx, name)| ImageRef::new(idx as u64 + 1, *name))
        .collect()
}

#[test]
fn two_wells_with_two_fov_each() {
    let plan = plan_wells(
        images(&[
            "WellA1_001.nd2",
            "WellA1_002.nd2",
            "WellB2_001.nd2",
            "WellB2_002.nd2",
        ]),
        None,
    )
    .unwrap();
    assert_eq!(plan.fov_per_well, 2);
    assert_eq!(plan.image_count(), 4);
    let coords = plan
        .wells
        .iter()
        .map(|group| group.coordinate)
        .collect::<Vec<_>>();
    assert_eq!(
        coords,
        vec![
            WellCoordinate { row: 0, column: 0 },
            WellCoordinate { row: 1, column: 1 }
        ]
    );
}

#[test]
fn unequal_fov_counts_fail() {
    let err = plan_wells(
        images(&["WellA1_001.nd2", "WellB2_001.nd2", "WellB2_002.nd2"]),
        None,
    )
    .unwrap_err();
    assert_matches!(err, PlateError::InconsistentFov);
}

#[test]
fn naming_error_names_the_image() {
    let err = plan_wells(images(&["WellA1_1.nd2", "Plate1_xyz.nd2"]), None).unwrap_err();
    assert_matches!(err, PlateError::NamingConvention { ref image } if image == "Plate1_xyz.nd2");
}

#[test]
fn prefix_check_is_case_sensitive() {
    let err = plan_wells(images(&["wellA1_1.nd2"]), None).unwrap_err();
    assert_matches!(err, PlateError::NamingConvention { .. });
}

#[test]
fn filtered_out_images_are_not_validated() {
    let plan = plan_wells(
        images(&["WellA1_gfp.nd2", "overview.png", "WellB1_gfp.nd2"]),
        Some("gfp"),
    )
    .unwrap();
    assert_eq!(plan.wells.len(), 2);
}

#[test]
fn two_spellings_of_one_position_are_rejected() {
    let err = plan_wells(
        images(&["WellA1_1.nd2", "WellA01_1.nd2", "WellB2_1.nd2"]),
        None,
    )
    .unwrap_err();
    assert!(err.is_validation());
    assert_matches!(
        err,
        PlateError::DuplicateWellPosition { ref position, .. } if position == "A1"
    );
}
