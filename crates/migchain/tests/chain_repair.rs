use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use migchain::graph::HealthKind;
use migchain::{
    ChainError, DescriptorSet, RepairConfig, RepairStatus, RunMode, analyze, execute_repair,
    recover_repair,
};

fn revision_script(id: &str, parent: Option<&str>, create_date: &str) -> String {
    let down = match parent {
        Some(p) => format!("'{}'", p),
        None => "None".to_string(),
    };
    format!(
        r#""""{id} migration

Revision ID: {id}
Revises: {revises}
Create Date: {create_date}

"""
from alembic import op
import sqlalchemy as sa


# revision identifiers, used by Alembic.
revision = '{id}'
down_revision = {down}
branch_labels = None
depends_on = None


def upgrade():
    op.execute("SELECT 1")


def downgrade():
    pass
"#,
        id = id,
        revises = parent.unwrap_or(""),
        create_date = create_date,
        down = down
    )
}

struct Fixture {
    _dir: TempDir,
    root: PathBuf,
}

impl Fixture {
    fn new(revisions: &[(&str, Option<&str>)]) -> Self {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("migrations");
        fs::create_dir_all(root.join("versions")).unwrap();
        fs::write(root.join("versions").join("__init__.py"), "").unwrap();
        for (i, (id, parent)) in revisions.iter().enumerate() {
            let date = format!("2025-11-{:02} 12:00:00.000000", i + 1);
            fs::write(
                root.join("versions").join(format!("{}.py", id)),
                revision_script(id, *parent, &date),
            )
            .unwrap();
        }
        Self { _dir: dir, root }
    }

    fn versions(&self) -> PathBuf {
        self.root.join("versions")
    }

    fn snapshot(&self) -> BTreeMap<String, String> {
        fs::read_dir(self.versions())
            .unwrap()
            .map(|e| e.unwrap().path())
            .filter(|p| p.is_file())
            .map(|p| {
                (
                    p.file_name().unwrap().to_string_lossy().to_string(),
                    fs::read_to_string(&p).unwrap(),
                )
            })
            .collect()
    }

    fn down_revision_line(&self, id: &str) -> String {
        let src = fs::read_to_string(self.versions().join(format!("{}.py", id))).unwrap();
        src.lines()
            .find(|l| l.starts_with("down_revision"))
            .unwrap()
            .to_string()
    }

    fn write(&self, name: &str, content: &str) {
        fs::write(self.versions().join(name), content).unwrap();
    }
}

fn sidecars(dir: &Path) -> Vec<String> {
    fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .filter(|n| n.starts_with(".migchain") || n.ends_with(".migchain.tmp"))
        .collect()
}

#[tokio::test]
async fn multiple_roots_are_chained_in_order() {
    let fx = Fixture::new(&[("A", None), ("B", None), ("C", None)]);
    let config = RepairConfig::default();

    let check = execute_repair(&fx.root, RunMode::Check, &config).await.unwrap();
    assert_eq!(check.status, RepairStatus::NeedsFix);
    assert_eq!(check.report.health, HealthKind::MultipleRoots);
    assert_eq!(check.report.roots, vec!["A", "B", "C"]);

    let fix = execute_repair(&fx.root, RunMode::Fix, &config).await.unwrap();
    assert_eq!(fix.status, RepairStatus::Fixed);
    assert_eq!(fix.report.summary.edits_applied, 2);
    assert_eq!(fix.report.summary.roots_fixed, 2);
    assert!(fix.report.warnings.is_empty(), "{:?}", fix.report.warnings);

    assert_eq!(fx.down_revision_line("A"), "down_revision = None");
    assert_eq!(fx.down_revision_line("B"), "down_revision = 'A'");
    assert_eq!(fx.down_revision_line("C"), "down_revision = 'B'");
    let c = fs::read_to_string(fx.versions().join("C.py")).unwrap();
    assert!(c.contains("Revises: B\n"));
    assert!(sidecars(&fx.versions()).is_empty());
}

#[tokio::test]
async fn orphan_is_reported_and_never_written() {
    let fx = Fixture::new(&[("X", Some("Y"))]);
    let before = fx.snapshot();

    let fix = execute_repair(&fx.root, RunMode::Fix, &RepairConfig::default())
        .await
        .unwrap();
    assert_eq!(fix.status, RepairStatus::Unfixable);
    assert_eq!(fix.status.exit_code(), 2);
    assert_eq!(fix.report.health, HealthKind::Orphan);
    assert_eq!(fix.report.orphans[0].missing_parent, "Y");
    assert!(fix.report.edits.is_empty());
    assert_eq!(fx.snapshot(), before);
}

#[tokio::test]
async fn cycle_is_reported_with_members() {
    let fx = Fixture::new(&[("A", Some("C")), ("B", Some("A")), ("C", Some("B"))]);
    let before = fx.snapshot();

    let fix = execute_repair(&fx.root, RunMode::Fix, &RepairConfig::default())
        .await
        .unwrap();
    assert_eq!(fix.status, RepairStatus::Unfixable);
    assert_eq!(fix.report.health, HealthKind::CyclePresent);
    assert_eq!(fix.report.cycles, vec![vec!["A", "B", "C"]]);
    assert_eq!(fx.snapshot(), before);
}

#[tokio::test]
async fn diverged_heads_are_joined() {
    let fx = Fixture::new(&[("A", None), ("B", Some("A")), ("C", Some("A"))]);

    let dry = execute_repair(&fx.root, RunMode::DryRun, &RepairConfig::default())
        .await
        .unwrap();
    assert_eq!(dry.status, RepairStatus::NeedsFix);
    assert_eq!(dry.report.health, HealthKind::DivergedHeads);
    let diff = dry.report.diff.clone().unwrap();
    assert!(diff.contains("-down_revision = 'A'\n+down_revision = 'B'\n"));
    assert_eq!(fx.down_revision_line("C"), "down_revision = 'A'");

    let fix = execute_repair(&fx.root, RunMode::Fix, &RepairConfig::default())
        .await
        .unwrap();
    assert_eq!(fix.status, RepairStatus::Fixed);
    assert_eq!(fix.report.summary.heads_fixed, 1);
    assert_eq!(fx.down_revision_line("C"), "down_revision = 'B'");
}

#[tokio::test]
async fn healthy_chain_is_untouched() {
    let fx = Fixture::new(&[("A", None), ("B", Some("A")), ("C", Some("B"))]);
    let before = fx.snapshot();

    for mode in [RunMode::Check, RunMode::DryRun, RunMode::Fix] {
        let run = execute_repair(&fx.root, mode, &RepairConfig::default())
            .await
            .unwrap();
        assert_eq!(run.status, RepairStatus::Healthy);
        assert_eq!(run.status.exit_code(), 0);
        assert!(run.report.edits.is_empty());
        assert_eq!(
            run.report.chain_after,
            Some(vec!["A".to_string(), "B".to_string(), "C".to_string()])
        );
    }
    assert_eq!(fx.snapshot(), before);
}

#[tokio::test]
async fn fix_is_idempotent_and_converges() {
    let fx = Fixture::new(&[
        ("r1", None),
        ("r1a", Some("r1")),
        ("r1b", Some("r1")),
        ("r2", None),
        ("r2a", Some("r2")),
        ("r2b", Some("r2")),
    ]);
    let config = RepairConfig::default();

    let first = execute_repair(&fx.root, RunMode::Fix, &config).await.unwrap();
    assert_eq!(first.status, RepairStatus::Fixed);
    let after_first = fx.snapshot();

    let second = execute_repair(&fx.root, RunMode::Fix, &config).await.unwrap();
    assert_eq!(second.status, RepairStatus::Healthy);
    assert!(second.report.edits.is_empty());
    assert_eq!(fx.snapshot(), after_first);
    assert_eq!(second.report.chain_after, first.report.chain_after);
}

#[tokio::test]
async fn dry_run_is_deterministic_and_round_trips() {
    let fx = Fixture::new(&[
        ("a", None),
        ("b", Some("a")),
        ("c", Some("a")),
        ("d", None),
        ("e", Some("d")),
    ]);
    let config = RepairConfig::default();

    let one = execute_repair(&fx.root, RunMode::DryRun, &config).await.unwrap();
    let two = execute_repair(&fx.root, RunMode::DryRun, &config).await.unwrap();
    assert_eq!(one.report.edits, two.report.edits);
    assert_eq!(one.report.diff, two.report.diff);
    assert_eq!(one.report.to_json().unwrap(), two.report.to_json().unwrap());

    let set = DescriptorSet::scan(&fx.root, &config).await.unwrap();
    let repaired = set.graph().with_edits(&one.report.edits);
    assert!(analyze(&repaired).health.is_healthy());
}

#[tokio::test]
async fn failed_write_leaves_every_source_identical() {
    let fx = Fixture::new(&[("A", None), ("B", None), ("C", None), ("D", None)]);
    let before = fx.snapshot();
    // The last edit of the batch targets D.
    fs::create_dir(fx.versions().join("D.py.migchain.tmp")).unwrap();

    let err = execute_repair(&fx.root, RunMode::Fix, &RepairConfig::default())
        .await
        .unwrap_err();
    match err {
        ChainError::WriteFailure { reverted, .. } => {
            assert_eq!(
                reverted,
                vec![fx.versions().join("B.py"), fx.versions().join("C.py")]
            );
        }
        other => panic!("unexpected error: {:?}", other),
    }

    fs::remove_dir(fx.versions().join("D.py.migchain.tmp")).unwrap();
    assert_eq!(fx.snapshot(), before);
    assert!(sidecars(&fx.versions()).is_empty());
}

#[tokio::test]
async fn incomplete_journal_blocks_fix_until_recovered() {
    let fx = Fixture::new(&[("A", None), ("B", None)]);
    let original_b = fs::read_to_string(fx.versions().join("B.py")).unwrap();

    // Simulate a crash after B was rewritten.
    let backup_dir = fx.versions().join(".migchain.backup.1-1");
    fs::create_dir(&backup_dir).unwrap();
    fs::write(backup_dir.join("0000-B.py"), &original_b).unwrap();
    let rewritten = original_b.replace("down_revision = None", "down_revision = 'A'");
    fs::write(fx.versions().join("B.py"), &rewritten).unwrap();

    let set = DescriptorSet::scan(&fx.root, &RepairConfig::default())
        .await
        .unwrap();
    let original_hash = {
        // Hash of the original text, as recorded by a real run.
        let tmp = TempDir::new().unwrap();
        let scratch = tmp.path().join("versions");
        fs::create_dir(&scratch).unwrap();
        fs::write(scratch.join("B.py"), &original_b).unwrap();
        let scratch_set = DescriptorSet::scan(tmp.path(), &RepairConfig::default())
            .await
            .unwrap();
        scratch_set.get("B").unwrap().node.source.content_hash.clone()
    };
    let rewritten_hash = set.get("B").unwrap().node.source.content_hash.clone();
    assert_ne!(rewritten_hash, original_hash);

    let journal = serde_json::json!({
        "version": 1,
        "state": "APPLYING",
        "versions_dir": fx.versions(),
        "backup_dir": backup_dir,
        "created_at_unix": 0,
        "entries": [{
            "path": fx.versions().join("B.py"),
            "backup_path": backup_dir.join("0000-B.py"),
            "original_hash": original_hash,
            "new_hash": rewritten_hash,
        }],
    });
    fs::write(
        fx.versions().join(".migchain.journal.json"),
        serde_json::to_string_pretty(&journal).unwrap(),
    )
    .unwrap();

    let check = execute_repair(&fx.root, RunMode::Check, &RepairConfig::default())
        .await
        .unwrap();
    assert!(check.report.warnings.iter().any(|w| w.contains("APPLYING")));

    let err = execute_repair(&fx.root, RunMode::Fix, &RepairConfig::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ChainError::Journal(_)));

    let recovery = recover_repair(&fx.root, &RepairConfig::default())
        .await
        .unwrap();
    assert_eq!(recovery.restored, vec![fx.versions().join("B.py")]);
    assert_eq!(
        fs::read_to_string(fx.versions().join("B.py")).unwrap(),
        original_b
    );
    assert!(sidecars(&fx.versions()).is_empty());

    let fix = execute_repair(&fx.root, RunMode::Fix, &RepairConfig::default())
        .await
        .unwrap();
    assert_eq!(fix.status, RepairStatus::Fixed);
}

#[tokio::test]
async fn revises_header_update_can_be_disabled() {
    let fx = Fixture::new(&[("A", None), ("B", None)]);
    let config = RepairConfig::from_toml("update_revises_header = false\n").unwrap();

    execute_repair(&fx.root, RunMode::Fix, &config).await.unwrap();
    let b = fs::read_to_string(fx.versions().join("B.py")).unwrap();
    assert!(b.contains("down_revision = 'A'\n"));
    assert!(b.contains("Revises: \n"));
}

#[tokio::test]
async fn parse_errors_abort_before_analysis() {
    let fx = Fixture::new(&[("A", None)]);
    fx.write(
        "merge.py",
        "revision = 'm'\ndown_revision = ('A', 'B')\n",
    );
    let before = fx.snapshot();

    let err = execute_repair(&fx.root, RunMode::Fix, &RepairConfig::default())
        .await
        .unwrap_err();
    match err {
        ChainError::Parse { path, span, .. } => {
            assert_eq!(path, fx.versions().join("merge.py"));
            assert!(span.is_some());
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(fx.snapshot(), before);
}

#[tokio::test]
async fn duplicate_revision_is_a_parse_error() {
    let fx = Fixture::new(&[("A", None)]);
    fx.write("A_copy.py", &revision_script("A", None, "2025-12-01"));

    let err = execute_repair(&fx.root, RunMode::Check, &RepairConfig::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ChainError::Parse { .. }));
}

#[tokio::test]
async fn empty_directory_is_healthy_with_warning() {
    let fx = Fixture::new(&[]);
    let run = execute_repair(&fx.root, RunMode::Check, &RepairConfig::default())
        .await
        .unwrap();
    assert_eq!(run.status, RepairStatus::Healthy);
    assert_eq!(run.report.descriptors, 0);
    assert_eq!(run.report.warnings.len(), 1);
}
