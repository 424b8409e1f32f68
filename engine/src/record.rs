//! Recipe record types.

use crate::{error::Result, BlobRef, Error, RecipeId, RemoteId, Timestamp};
use serde::{Deserialize, Serialize};

/// Longest accepted title, in characters.
pub const MAX_TITLE_LEN: usize = 200;

/// Sync lifecycle of a recipe.
///
/// `Local → Pending → Synced | Conflict`. Conflict is left only through an
/// explicit resolution, which is a new edit and re-enters Pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    /// Saved locally, nothing queued yet
    Local,
    /// Local edits waiting for delivery
    Pending,
    /// Remote holds the latest local state
    Synced,
    /// Local and remote diverged, or the remote rejected an edit
    Conflict,
}

/// Where a recipe's photo stands relative to the remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhotoState {
    /// No photo attached
    None,
    /// Photo attached locally, remote not yet linked to it
    Pending,
    /// Remote record points at the uploaded photo
    Linked,
}

/// A latitude/longitude pair supplied by the location subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
}

impl Location {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Reject coordinates that are not finite or outside WGS84 bounds.
    pub fn validate(&self) -> Result<()> {
        if !self.latitude.is_finite() || !(-90.0..=90.0).contains(&self.latitude) {
            return Err(Error::validation(
                "location.latitude",
                format!("{} is outside [-90, 90]", self.latitude),
            ));
        }
        if !self.longitude.is_finite() || !(-180.0..=180.0).contains(&self.longitude) {
            return Err(Error::validation(
                "location.longitude",
                format!("{} is outside [-180, 180]", self.longitude),
            ));
        }
        Ok(())
    }

    /// Great-circle distance in kilometres (haversine).
    pub fn distance_km(&self, other: &Location) -> f64 {
        const EARTH_RADIUS_KM: f64 = 6371.0;
        let (lat1, lat2) = (self.latitude.to_radians(), other.latitude.to_radians());
        let dlat = lat2 - lat1;
        let dlon = (other.longitude - self.longitude).to_radians();
        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_KM * a.sqrt().asin()
    }
}

/// The text fields of a recipe as entered by the user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecipeDraft {
    pub title: String,
    #[serde(default)]
    pub ingredients: Vec<String>,
    #[serde(default)]
    pub steps: Vec<String>,
}

impl RecipeDraft {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn with_ingredients<I, S>(mut self, ingredients: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ingredients = ingredients.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_steps<I, S>(mut self, steps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.steps = steps.into_iter().map(Into::into).collect();
        self
    }
}

/// Snapshot of everything the remote stores about a recipe.
///
/// Change log entries carry one of these so that delivery never depends on
/// the record's current state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecipeContent {
    pub title: String,
    pub ingredients: Vec<String>,
    pub steps: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_ref: Option<BlobRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    /// Photo URL the remote linked to when the snapshot was taken
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
}

/// A recipe in the content store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecipeRecord {
    /// Stable local identifier
    pub id: RecipeId,
    pub title: String,
    pub ingredients: Vec<String>,
    pub steps: Vec<String>,
    /// Attached photo, resolving to a blob in the content store
    #[serde(default)]
    pub photo_ref: Option<BlobRef>,
    #[serde(default)]
    pub location: Option<Location>,
    /// Identifier assigned by the remote on first successful create
    #[serde(default)]
    pub remote_id: Option<RemoteId>,
    pub sync_state: SyncState,
    /// Logical timestamp of the last mutation
    pub updated_at: Timestamp,
    /// Logical timestamp of creation
    pub created_at: Timestamp,
    /// Remote `updatedAt` this record was last reconciled with
    #[serde(default)]
    pub remote_version: Option<u64>,
    /// Photo URL the remote currently links to
    #[serde(default)]
    pub photo_url: Option<String>,
    /// Tombstone flag, kept until the remote confirms deletion
    #[serde(default)]
    pub deleted: bool,
}

impl RecipeRecord {
    /// Create a new local record from a draft.
    pub fn new(id: impl Into<RecipeId>, draft: RecipeDraft, timestamp: Timestamp) -> Self {
        Self {
            id: id.into(),
            title: draft.title,
            ingredients: draft.ingredients,
            steps: draft.steps,
            photo_ref: None,
            location: None,
            remote_id: None,
            sync_state: SyncState::Local,
            updated_at: timestamp,
            created_at: timestamp,
            remote_version: None,
            photo_url: None,
            deleted: false,
        }
    }

    /// Check if record is active (not deleted).
    pub fn is_active(&self) -> bool {
        !self.deleted
    }

    /// Replace the text fields with a draft.
    pub fn apply_draft(&mut self, draft: RecipeDraft, timestamp: Timestamp) {
        self.title = draft.title;
        self.ingredients = draft.ingredients;
        self.steps = draft.steps;
        self.touch(timestamp);
    }

    /// Mark record as deleted (tombstone).
    pub fn mark_deleted(&mut self, timestamp: Timestamp) {
        self.deleted = true;
        self.touch(timestamp);
    }

    /// Record a local mutation at `timestamp`.
    pub fn touch(&mut self, timestamp: Timestamp) {
        self.updated_at = timestamp;
    }

    /// The text fields as a draft.
    pub fn draft(&self) -> RecipeDraft {
        RecipeDraft {
            title: self.title.clone(),
            ingredients: self.ingredients.clone(),
            steps: self.steps.clone(),
        }
    }

    /// Snapshot of the remotely visible fields.
    pub fn content(&self) -> RecipeContent {
        RecipeContent {
            title: self.title.clone(),
            ingredients: self.ingredients.clone(),
            steps: self.steps.clone(),
            photo_ref: self.photo_ref.clone(),
            location: self.location,
            photo_url: self.photo_url.clone(),
        }
    }

    /// A record pulled from the remote may carry a photo URL without any
    /// local blob; that photo counts as linked.
    pub fn photo_state(&self) -> PhotoState {
        match (&self.photo_ref, &self.photo_url) {
            (None, None) => PhotoState::None,
            (Some(_), None) => PhotoState::Pending,
            (_, Some(_)) => PhotoState::Linked,
        }
    }

    /// Validate the user-editable fields.
    pub fn validate(&self) -> Result<()> {
        validate_draft_fields(&self.title, &self.ingredients, &self.steps)?;
        if let Some(location) = &self.location {
            location.validate()?;
        }
        Ok(())
    }
}

fn validate_draft_fields(title: &str, ingredients: &[String], steps: &[String]) -> Result<()> {
    if title.trim().is_empty() {
        return Err(Error::validation("title", "must not be empty"));
    }
    if title.chars().count() > MAX_TITLE_LEN {
        return Err(Error::validation(
            "title",
            format!("longer than {} characters", MAX_TITLE_LEN),
        ));
    }
    if let Some(i) = ingredients.iter().position(|s| s.trim().is_empty()) {
        return Err(Error::validation(
            format!("ingredients[{}]", i),
            "must not be blank",
        ));
    }
    if let Some(i) = steps.iter().position(|s| s.trim().is_empty()) {
        return Err(Error::validation(format!("steps[{}]", i), "must not be blank"));
    }
    Ok(())
}

impl RecipeDraft {
    /// Validate the draft on its own, before it touches any record.
    pub fn validate(&self) -> Result<()> {
        validate_draft_fields(&self.title, &self.ingredients, &self.steps)
    }
}
