//! Proof-of-collection records: photos, measured weight, customer
//! signature and feedback, submitted once the assignment is completed.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{
    Assignment, AssignmentStatus, CollectionRecord, PhotoCategory, PhotoSet, VerificationStatus,
};
use crate::storage::Storage;
use crate::validation::ValidationErrors;

const DATA_IMAGE_PREFIX: &str = "data:image/";
/// Kilograms between estimate and measurement before a warning is raised
const WEIGHT_TOLERANCE_KG: f64 = 10.0;

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct WeightReading {
    pub record: CollectionRecord,
    /// Measured minus estimated, when the assignment carries an estimate
    #[serde(skip_serializing_if = "Option::is_none")]
    pub difference: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct RecordDetails {
    pub notes: Option<String>,
    pub customer_rating: Option<u8>,
    pub issues: Option<Vec<String>>,
}

fn owned_assignment(storage: &Storage, assignment_id: &str, picker_id: &str) -> Result<Assignment> {
    let assignment = storage
        .get_assignment(assignment_id)?
        .ok_or_else(|| Error::not_found("assignment", assignment_id))?;
    if assignment.picker_id != picker_id {
        return Err(Error::Forbidden);
    }
    Ok(assignment)
}

pub fn get(storage: &Storage, id: &str) -> Result<CollectionRecord> {
    storage
        .get_record(id)?
        .ok_or_else(|| Error::not_found("collection record", id))
}

/// Record as seen by the picker who owns its assignment.
pub fn get_owned(storage: &Storage, id: &str, picker_id: &str) -> Result<CollectionRecord> {
    let record = get(storage, id)?;
    owned_assignment(storage, &record.assignment_id, picker_id)?;
    Ok(record)
}

pub fn list_for_picker(storage: &Storage, picker_id: &str) -> Result<Vec<CollectionRecord>> {
    let mine: Vec<String> = storage
        .assignments()?
        .into_iter()
        .filter(|a| a.picker_id == picker_id)
        .map(|a| a.id)
        .collect();
    Ok(storage
        .records()?
        .into_iter()
        .filter(|r| mine.contains(&r.assignment_id))
        .collect())
}

/// Starts (or resumes) the pending record for an assignment. An assignment
/// with a verified record takes no further ones.
pub fn open(storage: &Storage, assignment_id: &str, picker_id: &str) -> Result<CollectionRecord> {
    let assignment = owned_assignment(storage, assignment_id, picker_id)?;
    if let Some(record_id) = storage.verified_record_for(assignment_id)? {
        warn!(assignment = %assignment_id, record = %record_id, "assignment already verified");
        return Err(already_verified(assignment_id));
    }

    if let Some(existing) = storage
        .records()?
        .into_iter()
        .find(|r| r.assignment_id == assignment_id && r.verification_status == VerificationStatus::Pending)
    {
        return Ok(existing);
    }

    let record = CollectionRecord {
        id: Uuid::new_v4(),
        assignment_id: assignment.id,
        customer_name: assignment.customer_name,
        address: assignment.address,
        waste_types: assignment.waste_types,
        photos: PhotoSet::default(),
        weight: 0.0,
        signature: String::new(),
        timestamp: Utc::now(),
        notes: String::new(),
        customer_rating: 5,
        issues: vec![],
        verification_status: VerificationStatus::Pending,
    };
    storage.put_record(&record)?;
    info!(record = %record.id, assignment = %assignment_id, "collection record opened");
    Ok(record)
}

fn already_verified(assignment_id: &str) -> Error {
    Error::Conflict(format!("Collection for assignment {assignment_id} is already verified"))
}

/// Applies `f` to a pending record owned by `picker_id`.
fn edit<F>(storage: &Storage, id: &str, picker_id: &str, f: F) -> Result<CollectionRecord>
where
    F: Fn(&mut CollectionRecord) -> Result<()>,
{
    let record = get(storage, id)?;
    owned_assignment(storage, &record.assignment_id, picker_id)?;
    storage.update_record(id, |r| {
        if r.verification_status != VerificationStatus::Pending {
            return Err(Error::Conflict(format!(
                "Collection record is already {}",
                r.verification_status
            )));
        }
        f(r)
    })
}

fn check_data_image(field: &str, value: &str) -> Result<()> {
    if value.starts_with(DATA_IMAGE_PREFIX) {
        Ok(())
    } else {
        Err(ValidationErrors::single(field, "Expected an image data URL").into())
    }
}

pub fn add_photo(
    storage: &Storage,
    id: &str,
    picker_id: &str,
    category: PhotoCategory,
    data_url: &str,
) -> Result<CollectionRecord> {
    check_data_image("photo", data_url)?;
    let record = edit(storage, id, picker_id, |r| {
        r.photos.category_mut(category).push(data_url.to_string());
        Ok(())
    })?;
    info!(record = %id, category = ?category, "photo captured");
    Ok(record)
}

pub fn remove_photo(
    storage: &Storage,
    id: &str,
    picker_id: &str,
    category: PhotoCategory,
    index: usize,
) -> Result<CollectionRecord> {
    edit(storage, id, picker_id, |r| {
        let photos = r.photos.category_mut(category);
        if index >= photos.len() {
            return Err(Error::not_found("photo", index.to_string()));
        }
        photos.remove(index);
        Ok(())
    })
}

pub fn record_weight(storage: &Storage, id: &str, picker_id: &str, weight: f64) -> Result<WeightReading> {
    if !(weight.is_finite() && weight >= 0.0) {
        return Err(ValidationErrors::single("weight", "Weight must be a non-negative number").into());
    }
    let record = edit(storage, id, picker_id, |r| {
        r.weight = weight;
        Ok(())
    })?;

    let estimate = storage
        .get_assignment(&record.assignment_id)?
        .and_then(|a| a.estimated_weight);
    let difference = estimate.map(|e| weight - e);
    let warning = difference.filter(|d| d.abs() > WEIGHT_TOLERANCE_KG).map(|d| {
        warn!(record = %id, difference = d, "weight discrepancy");
        format!("Actual weight differs from estimate by {:.1}kg. Please verify.", d.abs())
    });

    Ok(WeightReading {
        record,
        difference,
        warning,
    })
}

/// `None` clears the signature.
pub fn set_signature(
    storage: &Storage,
    id: &str,
    picker_id: &str,
    signature: Option<&str>,
) -> Result<CollectionRecord> {
    if let Some(signature) = signature {
        check_data_image("signature", signature)?;
    }
    edit(storage, id, picker_id, |r| {
        r.signature = signature.unwrap_or_default().to_string();
        Ok(())
    })
}

pub fn update_details(
    storage: &Storage,
    id: &str,
    picker_id: &str,
    details: &RecordDetails,
) -> Result<CollectionRecord> {
    if matches!(details.customer_rating, Some(r) if !(1..=5).contains(&r)) {
        return Err(ValidationErrors::single("customerRating", "Rating must be between 1 and 5").into());
    }
    edit(storage, id, picker_id, |r| {
        if let Some(notes) = &details.notes {
            r.notes = notes.clone();
        }
        if let Some(rating) = details.customer_rating {
            r.customer_rating = rating;
        }
        if let Some(issues) = &details.issues {
            r.issues = issues.clone();
        }
        Ok(())
    })
}

/// Marks the record verified once it carries a signature and a "before"
/// photo and its assignment has been completed.
pub fn submit(storage: &Storage, id: &str, picker_id: &str) -> Result<CollectionRecord> {
    let record = get_owned(storage, id, picker_id)?;
    if record.signature.is_empty() {
        return Err(ValidationErrors::single(
            "signature",
            "Customer signature is required to complete verification.",
        )
        .into());
    }
    if record.photos.before.is_empty() {
        return Err(ValidationErrors::single(
            "photos",
            "At least one 'before' photo is required for verification.",
        )
        .into());
    }

    let assignment = owned_assignment(storage, &record.assignment_id, picker_id)?;
    if assignment.status != AssignmentStatus::Completed {
        return Err(Error::transition(assignment.status, VerificationStatus::Verified));
    }

    // the store refuses a second verified record for the same assignment
    let record = edit(storage, id, picker_id, |r| {
        r.verification_status = VerificationStatus::Verified;
        r.timestamp = Utc::now();
        Ok(())
    })?;
    info!(record = %id, assignment = %record.assignment_id, weight = record.weight, "collection verified");
    Ok(record)
}

/// Administrative rejection of a record.
pub fn reject(storage: &Storage, id: &str) -> Result<CollectionRecord> {
    let record = storage.update_record(id, |r| {
        if r.verification_status == VerificationStatus::Rejected {
            return Err(Error::transition(r.verification_status, VerificationStatus::Rejected));
        }
        r.verification_status = VerificationStatus::Rejected;
        Ok(())
    })?;
    info!(record = %id, "collection record rejected");
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assignments::{self, tests::{draft, picker}};

    const PHOTO: &str = "data:image/svg+xml;base64,PHN2Zz48L3N2Zz4=";

    fn setup() -> (Storage, String) {
        let storage = Storage::temporary().unwrap();
        picker(&storage, "WP001");
        let a = assignments::create(&storage, draft("WP001", 25, 15.5, 2.3)).unwrap();
        (storage, a.id)
    }

    #[test]
    fn open_copies_assignment_and_resumes_pending() {
        let (storage, assignment_id) = setup();
        let record = open(&storage, &assignment_id, "WP001").unwrap();
        assert_eq!(record.customer_name, "Johnson Family");
        assert_eq!(record.waste_types, vec!["General Waste", "Cardboard"]);
        assert_eq!(record.customer_rating, 5);
        assert_eq!(record.verification_status, VerificationStatus::Pending);

        let again = open(&storage, &assignment_id, "WP001").unwrap();
        assert_eq!(again.id, record.id);
        assert!(matches!(open(&storage, &assignment_id, "WP002"), Err(Error::Forbidden)));
    }

    #[test]
    fn photos_must_be_image_data_urls() {
        let (storage, assignment_id) = setup();
        let id = open(&storage, &assignment_id, "WP001").unwrap().id.to_string();

        assert!(matches!(
            add_photo(&storage, &id, "WP001", PhotoCategory::Before, "http://example.com/a.png"),
            Err(Error::Validation(_))
        ));
        add_photo(&storage, &id, "WP001", PhotoCategory::Before, PHOTO).unwrap();
        let record = add_photo(&storage, &id, "WP001", PhotoCategory::Waste, PHOTO).unwrap();
        assert_eq!(record.photos.before.len(), 1);
        assert_eq!(record.photos.waste.len(), 1);

        let record = remove_photo(&storage, &id, "WP001", PhotoCategory::Waste, 0).unwrap();
        assert!(record.photos.waste.is_empty());
        assert!(matches!(
            remove_photo(&storage, &id, "WP001", PhotoCategory::After, 3),
            Err(Error::NotFound { kind: "photo", .. })
        ));
    }

    #[test]
    fn weight_discrepancy_is_a_warning() {
        let (storage, assignment_id) = setup();
        let id = open(&storage, &assignment_id, "WP001").unwrap().id.to_string();

        let close = record_weight(&storage, &id, "WP001", 50.0).unwrap();
        assert!(close.warning.is_none());
        assert_eq!(close.difference, Some(5.0));

        let far = record_weight(&storage, &id, "WP001", 60.5).unwrap();
        assert_eq!(
            far.warning.as_deref(),
            Some("Actual weight differs from estimate by 15.5kg. Please verify.")
        );
        assert_eq!(far.record.weight, 60.5);

        assert!(matches!(record_weight(&storage, &id, "WP001", -1.0), Err(Error::Validation(_))));
    }

    #[test]
    fn rating_is_bounded() {
        let (storage, assignment_id) = setup();
        let id = open(&storage, &assignment_id, "WP001").unwrap().id.to_string();
        let bad = RecordDetails {
            customer_rating: Some(6),
            ..Default::default()
        };
        assert!(matches!(update_details(&storage, &id, "WP001", &bad), Err(Error::Validation(_))));

        let good = RecordDetails {
            notes: Some("Bins behind house".to_string()),
            customer_rating: Some(4),
            issues: Some(vec!["Contaminated recycling".to_string()]),
        };
        let record = update_details(&storage, &id, "WP001", &good).unwrap();
        assert_eq!(record.customer_rating, 4);
        assert_eq!(record.issues.len(), 1);
    }

    #[test]
    fn submit_requires_signature_photo_and_completed_assignment() {
        let (storage, assignment_id) = setup();
        let id = open(&storage, &assignment_id, "WP001").unwrap().id.to_string();

        match submit(&storage, &id, "WP001") {
            Err(Error::Validation(e)) => assert_eq!(
                e.message_for("signature"),
                Some("Customer signature is required to complete verification.")
            ),
            other => panic!("unexpected {other:?}"),
        }

        set_signature(&storage, &id, "WP001", Some(PHOTO)).unwrap();
        match submit(&storage, &id, "WP001") {
            Err(Error::Validation(e)) => assert_eq!(
                e.message_for("photos"),
                Some("At least one 'before' photo is required for verification.")
            ),
            other => panic!("unexpected {other:?}"),
        }

        add_photo(&storage, &id, "WP001", PhotoCategory::Before, PHOTO).unwrap();
        assert!(matches!(submit(&storage, &id, "WP001"), Err(Error::InvalidTransition { .. })));

        assignments::start(&storage, &assignment_id, "WP001").unwrap();
        assignments::complete(&storage, &assignment_id, "WP001").unwrap();
        let verified = submit(&storage, &id, "WP001").unwrap();
        assert_eq!(verified.verification_status, VerificationStatus::Verified);

        // verified records are frozen
        assert!(matches!(
            set_signature(&storage, &id, "WP001", None),
            Err(Error::Conflict(_))
        ));
        assert_eq!(list_for_picker(&storage, "WP001").unwrap().len(), 1);
    }

    fn fill_and_submit(storage: &Storage, assignment_id: &str) -> Result<CollectionRecord> {
        let id = open(storage, assignment_id, "WP001")?.id.to_string();
        add_photo(storage, &id, "WP001", PhotoCategory::Before, PHOTO)?;
        set_signature(storage, &id, "WP001", Some(PHOTO))?;
        record_weight(storage, &id, "WP001", 40.0)?;
        submit(storage, &id, "WP001")
    }

    #[test]
    fn an_assignment_is_verified_once() {
        let (storage, assignment_id) = setup();
        assignments::start(&storage, &assignment_id, "WP001").unwrap();
        assignments::complete(&storage, &assignment_id, "WP001").unwrap();

        let verified = fill_and_submit(&storage, &assignment_id).unwrap();
        assert!(matches!(fill_and_submit(&storage, &assignment_id), Err(Error::Conflict(_))));
        assert!(matches!(submit(&storage, &verified.id.to_string(), "WP001"), Err(Error::Conflict(_))));

        let verified_count = list_for_picker(&storage, "WP001")
            .unwrap()
            .iter()
            .filter(|r| r.verification_status == VerificationStatus::Verified)
            .count();
        assert_eq!(verified_count, 1);
    }

    #[test]
    fn racing_submits_verify_one_record() {
        let (storage, assignment_id) = setup();
        // two pending records, as left by concurrent opens
        let first = open(&storage, &assignment_id, "WP001").unwrap();
        let mut second = first.clone();
        second.id = Uuid::new_v4();
        storage.put_record(&second).unwrap();
        for record in [&first, &second] {
            let id = record.id.to_string();
            add_photo(&storage, &id, "WP001", PhotoCategory::Before, PHOTO).unwrap();
            set_signature(&storage, &id, "WP001", Some(PHOTO)).unwrap();
        }
        assignments::start(&storage, &assignment_id, "WP001").unwrap();
        assignments::complete(&storage, &assignment_id, "WP001").unwrap();

        let ids = [first.id.to_string(), second.id.to_string()];
        let verified = std::thread::scope(|scope| {
            let handles: Vec<_> = ids
                .iter()
                .map(|id| {
                    let storage = &storage;
                    scope.spawn(move || submit(storage, id, "WP001").is_ok())
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).filter(|ok| *ok).count()
        });
        assert_eq!(verified, 1);
    }

    #[test]
    fn reject_marks_record() {
        let (storage, assignment_id) = setup();
        let id = open(&storage, &assignment_id, "WP001").unwrap().id.to_string();
        assert_eq!(reject(&storage, &id).unwrap().verification_status, VerificationStatus::Rejected);
        assert!(reject(&storage, &id).is_err());
        // a rejected record does not block a fresh one
        assert_ne!(open(&storage, &assignment_id, "WP001").unwrap().id.to_string(), id);
    }
}
