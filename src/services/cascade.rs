//! Cascade deletion across the denormalized document graph.
//!
//! Deleting a section takes its subtree, every subject under those
//! sections, every entity under those subjects, their analytics records and
//! the membership references on user and group documents. The cascade is
//! not transactional: individual failures are recorded in the report and
//! logged, never retried, so a partially deleted tree can be cleaned up by
//! running the same delete again.

use crate::models::{analytics, entity, group::Group, group, metadata, section, subject, user};
use crate::storage::FileStore;
use crate::store::{DocStore, StoreError};

/// What a cascade actually removed, so the caller can settle quotas and
/// billing against real counts instead of assumed ones.
#[derive(Debug, Default)]
pub struct CascadeReport {
    pub section_ids: Vec<String>,
    pub subject_ids: Vec<String>,
    pub entity_ids: Vec<String>,
    /// Content bytes released by deleted entities.
    pub freed_bytes: i64,
    /// Human-readable descriptions of steps that failed and were skipped.
    pub failed: Vec<String>,
}

impl CascadeReport {
    fn record_failure(&mut self, what: &str, err: &StoreError) {
        tracing::warn!(%what, %err, "cascade step failed");
        self.failed.push(format!("{what}: {err}"));
    }
}

/// Delete every entity of one subject along with its analytics, folding the
/// result into the report.
async fn drain_subject(
    store: &dyn DocStore,
    files: &dyn FileStore,
    subject: &subject::Subject,
    report: &mut CascadeReport,
) {
    let members = subject.roles.members();
    match entity::remove_all(store, files, &subject.subject_id).await {
        Ok(entities) => {
            let entity_ids: Vec<String> =
                entities.iter().map(|e| e.entity_id.clone()).collect();
            report.freed_bytes += entities.iter().map(|e| e.content_size).sum::<i64>();
            analytics::remove_entities_complete(store, &entity_ids, &members).await;
            report.entity_ids.extend(entity_ids);
        }
        Err(err) => report.record_failure(&format!("entities of {}", subject.subject_id), &err),
    }
}

/// Delete a subject, its entities and all references to it.
pub async fn remove_subject(
    store: &dyn DocStore,
    files: &dyn FileStore,
    group_doc: &mut Group,
    subject_id: &str,
) -> Result<CascadeReport, StoreError> {
    let subject_doc = subject::get(store, subject_id).await?;
    let mut report = CascadeReport::default();

    drain_subject(store, files, &subject_doc, &mut report).await;
    subject::remove(store, subject_id).await?;
    report.subject_ids.push(subject_id.to_string());

    // detach from the owning section, if any
    if !subject_doc.section_id.is_empty() {
        match section::get(store, &subject_doc.section_id).await {
            Ok(mut owning) => {
                owning.remove_subjects(&[subject_id.to_string()]);
                section::save(store, &mut owning).await?;
            }
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(err),
        }
    }

    group_doc.remove_subjects(&[subject_id.to_string()]);
    group_doc.update_storage(-report.freed_bytes);
    group::save(store, group_doc).await?;
    user::remove_all_from_subjects(store, &[subject_id.to_string()]).await?;
    Ok(report)
}

/// Delete a section subtree with everything hanging off it.
pub async fn remove_section(
    store: &dyn DocStore,
    files: &dyn FileStore,
    group_doc: &mut Group,
    section_id: &str,
) -> Result<CascadeReport, StoreError> {
    let root = section::get(store, section_id).await?;
    let removed_sections = section::remove_tree(store, root).await?;
    let mut report = CascadeReport::default();
    report.section_ids = removed_sections.iter().map(|s| s.section_id.clone()).collect();

    for sec in &removed_sections {
        if sec.subject_ids.is_empty() {
            continue;
        }
        match subject::remove_all(store, &sec.section_id).await {
            Ok(subjects) => {
                for subject_doc in &subjects {
                    drain_subject(store, files, subject_doc, &mut report).await;
                    report.subject_ids.push(subject_doc.subject_id.clone());
                }
            }
            Err(err) => {
                report.record_failure(&format!("subjects of {}", sec.section_id), &err)
            }
        }
    }

    user::remove_all_from_sections(store, &report.section_ids, &report.subject_ids).await?;
    group_doc.remove_sections(&report.section_ids, &report.subject_ids);
    group_doc.update_storage(-report.freed_bytes);
    group::save(store, group_doc).await?;
    Ok(report)
}

/// Delete a whole group: subjects, entities, analytics, section documents,
/// member references, the group document and its metadata record.
pub async fn remove_group(
    store: &dyn DocStore,
    files: &dyn FileStore,
    group_doc: &Group,
) -> Result<CascadeReport, StoreError> {
    let mut report = CascadeReport::default();

    for subject_id in &group_doc.subject_ids {
        match subject::get(store, subject_id).await {
            Ok(subject_doc) => {
                drain_subject(store, files, &subject_doc, &mut report).await;
                if let Err(err) = subject::remove(store, subject_id).await {
                    report.record_failure(&format!("subject {subject_id}"), &err);
                } else {
                    report.subject_ids.push(subject_id.clone());
                }
            }
            Err(err) => report.record_failure(&format!("subject {subject_id}"), &err),
        }
    }

    // section documents go directly; their subjects were reachable from the
    // group's subject list
    for section_id in &group_doc.section_ids {
        if let Err(err) = store.delete(crate::store::SECTIONS, section_id).await {
            report.record_failure(&format!("section {section_id}"), &err);
        } else {
            report.section_ids.push(section_id.clone());
        }
    }

    for uid in group_doc.roles.members() {
        match user::get(store, &uid).await {
            Ok(mut member) => {
                member.remove_from_group(
                    &group_doc.group_id,
                    &group_doc.section_ids,
                    &group_doc.subject_ids,
                    true,
                );
                if let Err(err) = user::save(store, &mut member).await {
                    report.record_failure(&format!("user {uid}"), &err);
                }
            }
            Err(err) if err.is_not_found() => {}
            Err(err) => report.record_failure(&format!("user {uid}"), &err),
        }
    }

    group::remove(store, &group_doc.group_id).await?;
    if let Err(err) = metadata::remove(store, &group_doc.group_id).await {
        report.record_failure("metadata", &err);
    }
    Ok(report)
}
