//! Assembling export records from fetched entities and geocoding results.
//!
//! Each builder takes the entities in fetch order plus one optional
//! coordinate per entity (`geos[i]` belongs to entity `i`). A `None`
//! coordinate means the entity was not geocoded, either because the export
//! is local-only or because its point failed in a settled batch.

use crate::types::{ExportRecord, GeoCoordinate, Location, Note, Point3D, Tag};

/// The point to geocode for each location.
#[must_use]
pub fn location_points(locations: &[Location]) -> Vec<Point3D> {
    locations.iter().map(|l| l.position).collect()
}

/// The anchor point to geocode for each tag.
#[must_use]
pub fn tag_points(tags: &[Tag]) -> Vec<Point3D> {
    tags.iter().map(|t| t.anchor_position).collect()
}

/// The anchor point to geocode for each note.
#[must_use]
pub fn note_points(notes: &[Note]) -> Vec<Point3D> {
    notes.iter().map(|n| n.anchor_position).collect()
}

/// Build one sweep record per pano.
///
/// Pano ids are `{location id}_pano{n}` with `n` counting from 1 within the
/// location. With `include_skybox`, panos without a complete six-image skybox
/// are skipped and the image URLs are attached to the rest.
#[must_use]
pub fn sweep_records(
    locations: &[Location],
    geos: &[Option<GeoCoordinate>],
    include_skybox: bool,
) -> Vec<ExportRecord> {
    let mut records = Vec::new();
    for (location, geo) in locations.iter().zip(geos) {
        for (n, pano) in location.panos.iter().enumerate() {
            let skybox_images = if include_skybox {
                let Some(images) = pano.complete_skybox() else {
                    tracing::debug!(
                        location = %location.id,
                        pano = n + 1,
                        "skipping pano without a complete skybox"
                    );
                    continue;
                };
                Some(images.to_vec())
            } else {
                None
            };

            records.push(ExportRecord::Sweep {
                id: format!("{}_pano{}", location.id, n + 1),
                local: location.position,
                geo: *geo,
                skybox_images,
            });
        }
    }
    records
}

/// Build one record per tag.
#[must_use]
pub fn tag_records(tags: &[Tag], geos: &[Option<GeoCoordinate>]) -> Vec<ExportRecord> {
    tags.iter()
        .zip(geos)
        .map(|(tag, geo)| ExportRecord::Tag {
            id: tag.id.clone(),
            label: tag.label.clone(),
            local: tag.anchor_position,
            geo: *geo,
        })
        .collect()
}

/// Build one record per note; the note label becomes the record text.
#[must_use]
pub fn note_records(notes: &[Note], geos: &[Option<GeoCoordinate>]) -> Vec<ExportRecord> {
    notes
        .iter()
        .zip(geos)
        .map(|(note, geo)| ExportRecord::Note {
            id: note.id.clone(),
            text: note.label.clone(),
            local: note.anchor_position,
            geo: *geo,
        })
        .collect()
}
