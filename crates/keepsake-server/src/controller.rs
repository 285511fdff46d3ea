//! Capsule access and lifecycle rules.
//!
//! [`CapsuleController`] mediates every read and write of capsule records:
//! it enforces ownership and participant visibility, hands attached files to
//! the media store, and assembles the persisted document shape. Handlers in
//! `api` never touch the database directly.
//!
//! Each operation takes an explicit input struct produced by a single
//! validation step ([`CapsuleDraft::into_create_input`] /
//! [`CapsuleDraft::into_update_input`]); by the time the controller runs, the
//! input is known-good.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use keepsake_store::{Capsule, Database};

use crate::error::ApiError;
use crate::media::MediaStore;

// ---------------------------------------------------------------------------
// Operation inputs
// ---------------------------------------------------------------------------

/// An uploaded file spooled to the staging directory during request parsing.
#[derive(Debug)]
pub struct StagedFile {
    pub path: PathBuf,
    pub file_name: String,
}

#[derive(Debug)]
pub struct CreateCapsuleInput {
    pub title: String,
    pub description: String,
    pub open_at: DateTime<Utc>,
    pub participants: Vec<String>,
    pub files: Vec<StagedFile>,
}

/// Partial update: `None` means "leave the stored value alone".
#[derive(Debug)]
pub struct UpdateCapsuleInput {
    pub title: Option<String>,
    pub description: Option<String>,
    pub open_at: Option<DateTime<Utc>>,
    pub participants: Option<Vec<String>>,
    pub files: Vec<StagedFile>,
}

/// Raw, unvalidated request fields, common to JSON and multipart bodies.
///
/// Multipart requests fill this in field by field; JSON bodies deserialize
/// straight into it. `openDate` is accepted as an alias for `openAt`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CapsuleDraft {
    pub title: Option<String>,
    pub description: Option<String>,
    #[serde(alias = "openDate")]
    pub open_at: Option<String>,
    pub participants: Option<ParticipantsField>,
}

/// `participants` arrives either pre-parsed (JSON array) or as a
/// JSON-encoded string (multipart form field).
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ParticipantsField {
    Parsed(Vec<String>),
    Raw(String),
}

impl ParticipantsField {
    fn into_vec(self) -> Result<Vec<String>, ApiError> {
        match self {
            ParticipantsField::Parsed(v) => Ok(v),
            ParticipantsField::Raw(s) => serde_json::from_str(&s)
                .map_err(|e| ApiError::Validation(format!("Invalid `participants`: {}", e))),
        }
    }
}

impl CapsuleDraft {
    /// Validate the draft for the Create operation.
    pub fn into_create_input(self, files: Vec<StagedFile>) -> Result<CreateCapsuleInput, ApiError> {
        let missing = || ApiError::Validation("`title` and `openAt` are required".to_string());

        let title = self
            .title
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(missing)?;
        let open_at = parse_open_at(&self.open_at.ok_or_else(missing)?)?;
        let participants = match self.participants {
            Some(p) => p.into_vec()?,
            None => Vec::new(),
        };

        Ok(CreateCapsuleInput {
            title,
            description: self.description.unwrap_or_default(),
            open_at,
            participants,
            files,
        })
    }

    /// Validate the draft for the Update operation. Absent fields stay `None`.
    pub fn into_update_input(self, files: Vec<StagedFile>) -> Result<UpdateCapsuleInput, ApiError> {
        if let Some(title) = &self.title {
            if title.trim().is_empty() {
                return Err(ApiError::Validation("`title` cannot be empty".to_string()));
            }
        }

        let open_at = self.open_at.as_deref().map(parse_open_at).transpose()?;
        let participants = self.participants.map(|p| p.into_vec()).transpose()?;

        Ok(UpdateCapsuleInput {
            title: self.title,
            description: self.description,
            open_at,
            participants,
            files,
        })
    }
}

fn parse_open_at(raw: &str) -> Result<DateTime<Utc>, ApiError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| ApiError::Validation(format!("Invalid `openAt` timestamp: {}", e)))
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

pub struct CapsuleController {
    db: Arc<Mutex<Database>>,
    media: Arc<MediaStore>,
}

impl CapsuleController {
    pub fn new(db: Arc<Mutex<Database>>, media: Arc<MediaStore>) -> Self {
        Self { db, media }
    }

    /// Create a capsule owned by `caller`.
    ///
    /// Attached files are ingested first, in upload order; if any ingestion
    /// fails, nothing is persisted.
    pub async fn create(
        &self,
        caller: &str,
        input: CreateCapsuleInput,
    ) -> Result<Capsule, ApiError> {
        let image_urls = self.upload_and_cleanup(input.files).await?;

        let now = Utc::now();
        let capsule = Capsule {
            id: Uuid::new_v4(),
            owner_uid: caller.to_string(),
            title: input.title,
            description: input.description,
            open_at: input.open_at,
            image_urls,
            participants: input.participants,
            is_opened: false,
            notify_sent: false,
            created_at: now,
            updated_at: now,
        };

        // Persist, then read back: stored timestamps are truncated to
        // microsecond precision, and callers get exactly what was stored.
        let db = self.db.lock().await;
        db.create_capsule(&capsule)?;
        let stored = db.get_capsule(capsule.id)?;

        info!(id = %stored.id, owner = %caller, "Capsule created");
        Ok(stored)
    }

    /// List the caller's own capsules, most recent first.
    ///
    /// Capsules where the caller is only a participant are not listed.
    pub async fn list(&self, caller: &str) -> Result<Vec<Capsule>, ApiError> {
        Ok(self.db.lock().await.list_capsules_for_owner(caller)?)
    }

    /// Fetch one capsule, visible to the owner and participants.
    ///
    /// Lock state does not gate reads: an authorized caller receives the full
    /// record even before `open_at`.
    pub async fn get(&self, caller: &str, id: Uuid) -> Result<Capsule, ApiError> {
        let capsule = self.db.lock().await.get_capsule(id)?;

        if !capsule.is_visible_to(caller) {
            return Err(ApiError::Forbidden("Forbidden".to_string()));
        }
        Ok(capsule)
    }

    /// Apply a partial update, owner-only.
    ///
    /// New uploads append to `image_urls`; absent fields keep their stored
    /// values; `updated_at` is always refreshed. Returns a fresh read of the
    /// post-update record. Concurrent updates race read-then-write with
    /// last-write-wins on whichever fields each writer supplied.
    pub async fn update(
        &self,
        caller: &str,
        id: Uuid,
        input: UpdateCapsuleInput,
    ) -> Result<Capsule, ApiError> {
        let mut capsule = {
            let db = self.db.lock().await;
            db.get_capsule(id)?
        };

        if capsule.owner_uid != caller {
            return Err(ApiError::Forbidden(
                "Only the owner can update a capsule".to_string(),
            ));
        }

        if !input.files.is_empty() {
            let new_urls = self.upload_and_cleanup(input.files).await?;
            capsule.image_urls.extend(new_urls);
        }

        if let Some(title) = input.title {
            capsule.title = title;
        }
        if let Some(description) = input.description {
            capsule.description = description;
        }
        if let Some(open_at) = input.open_at {
            capsule.open_at = open_at;
        }
        if let Some(participants) = input.participants {
            capsule.participants = participants;
        }
        capsule.updated_at = Utc::now();

        let db = self.db.lock().await;
        db.replace_capsule(&capsule)?;
        let updated = db.get_capsule(id)?;

        info!(id = %id, owner = %caller, "Capsule updated");
        Ok(updated)
    }

    /// Hard-delete a capsule, owner-only. No tombstone, no recovery path.
    pub async fn delete(&self, caller: &str, id: Uuid) -> Result<(), ApiError> {
        let db = self.db.lock().await;

        let capsule = db.get_capsule(id)?;
        if capsule.owner_uid != caller {
            return Err(ApiError::Forbidden(
                "Only the owner can delete a capsule".to_string(),
            ));
        }

        db.delete_capsule(id)?;

        info!(id = %id, owner = %caller, "Capsule deleted");
        Ok(())
    }

    /// Ingest staged files in upload order and remove each staged copy.
    ///
    /// Ingestion failure aborts the whole operation; failure to remove a
    /// staged copy is logged and ignored.
    async fn upload_and_cleanup(&self, files: Vec<StagedFile>) -> Result<Vec<String>, ApiError> {
        let mut urls = Vec::with_capacity(files.len());
        for file in files {
            let url = self.media.ingest(&file.path, &file.file_name).await?;
            urls.push(url);

            if let Err(e) = tokio::fs::remove_file(&file.path).await {
                warn!(
                    path = %file.path.display(),
                    error = %e,
                    "Failed to remove staged upload"
                );
            }
        }
        Ok(urls)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::TempDir;

    struct Harness {
        controller: CapsuleController,
        stage_dir: TempDir,
        _db_dir: TempDir,
        _media_dir: TempDir,
    }

    async fn harness() -> Harness {
        let db_dir = TempDir::new().unwrap();
        let media_dir = TempDir::new().unwrap();
        let stage_dir = TempDir::new().unwrap();

        let db = Database::open_at(&db_dir.path().join("test.db")).unwrap();
        let media = MediaStore::new(
            media_dir.path().to_path_buf(),
            "http://localhost:8080",
            1024 * 1024,
        )
        .await
        .unwrap();

        Harness {
            controller: CapsuleController::new(
                Arc::new(Mutex::new(db)),
                Arc::new(media),
            ),
            stage_dir,
            _db_dir: db_dir,
            _media_dir: media_dir,
        }
    }

    fn create_input(title: &str) -> CreateCapsuleInput {
        CreateCapsuleInput {
            title: title.to_string(),
            description: String::new(),
            open_at: Utc::now() + Duration::days(365),
            participants: vec!["bob".to_string()],
            files: Vec::new(),
        }
    }

    fn empty_update() -> UpdateCapsuleInput {
        UpdateCapsuleInput {
            title: None,
            description: None,
            open_at: None,
            participants: None,
            files: Vec::new(),
        }
    }

    async fn stage_file(h: &Harness, name: &str, data: &[u8]) -> StagedFile {
        let path = h.stage_dir.path().join(format!("stage-{}", Uuid::new_v4()));
        tokio::fs::write(&path, data).await.unwrap();
        StagedFile {
            path,
            file_name: name.to_string(),
        }
    }

    #[tokio::test]
    async fn create_assembles_document() {
        let h = harness().await;
        let capsule = h.controller.create("alice", create_input("Trip")).await.unwrap();

        assert_eq!(capsule.owner_uid, "alice");
        assert_eq!(capsule.title, "Trip");
        assert_eq!(capsule.created_at, capsule.updated_at);
        assert!(!capsule.is_opened);
        assert!(capsule.image_urls.is_empty());

        // Persisted record matches the returned one.
        let fetched = h.controller.get("alice", capsule.id).await.unwrap();
        assert_eq!(fetched.id, capsule.id);
        assert_eq!(fetched.title, "Trip");
    }

    #[tokio::test]
    async fn create_with_files_stores_urls_in_order_and_purges_staging() {
        let h = harness().await;
        let f1 = stage_file(&h, "a.jpg", b"one").await;
        let f2 = stage_file(&h, "b.png", b"two").await;
        let (p1, p2) = (f1.path.clone(), f2.path.clone());

        let mut input = create_input("Trip");
        input.files = vec![f1, f2];
        let capsule = h.controller.create("alice", input).await.unwrap();

        assert_eq!(capsule.image_urls.len(), 2);
        assert!(capsule.image_urls[0].ends_with(".jpg"));
        assert!(capsule.image_urls[1].ends_with(".png"));
        assert!(!p1.exists());
        assert!(!p2.exists());
    }

    #[tokio::test]
    async fn get_enforces_visibility() {
        let h = harness().await;
        let capsule = h.controller.create("alice", create_input("Trip")).await.unwrap();

        assert!(h.controller.get("alice", capsule.id).await.is_ok());
        assert!(h.controller.get("bob", capsule.id).await.is_ok());
        assert!(matches!(
            h.controller.get("mallory", capsule.id).await,
            Err(ApiError::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn get_unknown_id_is_not_found() {
        let h = harness().await;
        assert!(matches!(
            h.controller.get("alice", Uuid::new_v4()).await,
            Err(ApiError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn update_is_owner_only_and_partial() {
        let h = harness().await;
        let capsule = h.controller.create("alice", create_input("Trip")).await.unwrap();

        // Participants have read access but may not update.
        let mut input = empty_update();
        input.title = Some("Hijacked".to_string());
        assert!(matches!(
            h.controller.update("bob", capsule.id, input).await,
            Err(ApiError::Forbidden(_))
        ));

        let mut input = empty_update();
        input.description = Some("New description".to_string());
        let updated = h.controller.update("alice", capsule.id, input).await.unwrap();

        // Only the supplied field changed; identity fields are untouched.
        assert_eq!(updated.title, "Trip");
        assert_eq!(updated.description, "New description");
        assert_eq!(updated.owner_uid, "alice");
        assert_eq!(updated.created_at, capsule.created_at);
        assert!(updated.updated_at > capsule.updated_at);
    }

    #[tokio::test]
    async fn update_appends_image_urls() {
        let h = harness().await;
        let f1 = stage_file(&h, "a.jpg", b"one").await;
        let f2 = stage_file(&h, "b.jpg", b"two").await;
        let mut input = create_input("Trip");
        input.files = vec![f1, f2];
        let capsule = h.controller.create("alice", input).await.unwrap();

        let f3 = stage_file(&h, "c.jpg", b"three").await;
        let mut update = empty_update();
        update.files = vec![f3];
        let updated = h.controller.update("alice", capsule.id, update).await.unwrap();

        assert_eq!(updated.image_urls.len(), 3);
        assert_eq!(&updated.image_urls[..2], &capsule.image_urls[..]);
    }

    #[tokio::test]
    async fn update_without_files_never_shrinks_image_urls() {
        let h = harness().await;
        let f1 = stage_file(&h, "a.jpg", b"one").await;
        let mut input = create_input("Trip");
        input.files = vec![f1];
        let capsule = h.controller.create("alice", input).await.unwrap();

        let mut update = empty_update();
        update.title = Some("Renamed".to_string());
        let updated = h.controller.update("alice", capsule.id, update).await.unwrap();

        assert_eq!(updated.image_urls, capsule.image_urls);
    }

    #[tokio::test]
    async fn delete_is_owner_only_and_hard() {
        let h = harness().await;
        let capsule = h.controller.create("alice", create_input("Trip")).await.unwrap();

        assert!(matches!(
            h.controller.delete("bob", capsule.id).await,
            Err(ApiError::Forbidden(_))
        ));

        h.controller.delete("alice", capsule.id).await.unwrap();

        for caller in ["alice", "bob", "mallory"] {
            assert!(matches!(
                h.controller.get(caller, capsule.id).await,
                Err(ApiError::NotFound(_))
            ));
        }
    }

    #[tokio::test]
    async fn list_scopes_to_owner_in_desc_order() {
        let h = harness().await;
        let first = h.controller.create("alice", create_input("First")).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let second = h.controller.create("alice", create_input("Second")).await.unwrap();
        h.controller.create("carol", create_input("Other")).await.unwrap();

        let listed = h.controller.list("alice").await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, second.id);
        assert_eq!(listed[1].id, first.id);

        // Participant-only capsules are not listed.
        assert!(h.controller.list("bob").await.unwrap().is_empty());
    }

    // -- validation ---------------------------------------------------------

    #[test]
    fn draft_requires_title_and_open_at() {
        let draft = CapsuleDraft {
            title: Some("Trip".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            draft.into_create_input(Vec::new()),
            Err(ApiError::Validation(_))
        ));

        let draft = CapsuleDraft {
            open_at: Some("2030-01-01T00:00:00Z".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            draft.into_create_input(Vec::new()),
            Err(ApiError::Validation(_))
        ));

        let draft = CapsuleDraft {
            title: Some("  ".to_string()),
            open_at: Some("2030-01-01T00:00:00Z".to_string()),
            ..Default::default()
        };
        assert!(draft.into_create_input(Vec::new()).is_err());
    }

    #[test]
    fn draft_rejects_bad_open_at() {
        let draft = CapsuleDraft {
            title: Some("Trip".to_string()),
            open_at: Some("next tuesday".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            draft.into_create_input(Vec::new()),
            Err(ApiError::Validation(_))
        ));
    }

    #[test]
    fn draft_parses_participants_both_shapes() {
        let draft = CapsuleDraft {
            title: Some("Trip".to_string()),
            open_at: Some("2030-01-01T00:00:00Z".to_string()),
            participants: Some(ParticipantsField::Raw(r#"["bob","carol"]"#.to_string())),
            ..Default::default()
        };
        let input = draft.into_create_input(Vec::new()).unwrap();
        assert_eq!(input.participants, vec!["bob", "carol"]);

        let draft = CapsuleDraft {
            title: Some("Trip".to_string()),
            open_at: Some("2030-01-01T00:00:00Z".to_string()),
            participants: Some(ParticipantsField::Parsed(vec!["bob".to_string()])),
            ..Default::default()
        };
        assert_eq!(
            draft.into_create_input(Vec::new()).unwrap().participants,
            vec!["bob"]
        );

        let draft = CapsuleDraft {
            title: Some("Trip".to_string()),
            open_at: Some("2030-01-01T00:00:00Z".to_string()),
            participants: Some(ParticipantsField::Raw("not json".to_string())),
            ..Default::default()
        };
        assert!(matches!(
            draft.into_create_input(Vec::new()),
            Err(ApiError::Validation(_))
        ));
    }

    #[test]
    fn update_draft_rejects_empty_title_only_when_present() {
        let draft = CapsuleDraft {
            title: Some(String::new()),
            ..Default::default()
        };
        assert!(draft.into_update_input(Vec::new()).is_err());

        let draft = CapsuleDraft::default();
        let input = draft.into_update_input(Vec::new()).unwrap();
        assert!(input.title.is_none());
        assert!(input.open_at.is_none());
    }
}
