use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use prompt_patcher::config::{self, PatchSet};
use prompt_patcher::{
    nearest_line, patch_file, FileOutcome, PatchError, SafetyError, StepResult, WorkspaceGuard,
    WriteMode,
};
use similar::{ChangeTag, TextDiff};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

const WORKSPACE_ENV: &str = "PROMPT_PATCHER_WORKSPACE";

#[derive(Parser)]
#[command(name = "prompt-patcher")]
#[command(about = "Idempotent anchor-guarded patcher for promptService.js", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply patch sets to the target file
    Apply {
        /// Path to workspace root (auto-detected if not specified)
        #[arg(short, long)]
        workspace: Option<PathBuf>,

        /// File to patch instead of the patch set's target
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Patch set file or directory of .toml files (built-in set if omitted)
        #[arg(short, long)]
        patches: Option<PathBuf>,

        /// Dry run - show what would be changed without modifying files
        #[arg(short = 'n', long)]
        dry_run: bool,

        /// Show unified diff of changes
        #[arg(short, long)]
        diff: bool,
    },

    /// Report which steps are applied without modifying anything
    Check {
        /// Path to workspace root (auto-detected if not specified)
        #[arg(short, long)]
        workspace: Option<PathBuf>,

        /// File to check instead of the patch set's target
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Patch set file or directory of .toml files (built-in set if omitted)
        #[arg(short, long)]
        patches: Option<PathBuf>,
    },

    /// List the steps of the patch sets
    Show {
        /// Patch set file or directory of .toml files (built-in set if omitted)
        #[arg(short, long)]
        patches: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Apply {
            workspace,
            file,
            patches,
            dry_run,
            diff,
        } => cmd_apply(workspace, file, patches, dry_run, diff),

        Commands::Check {
            workspace,
            file,
            patches,
        } => cmd_check(workspace, file, patches),

        Commands::Show { patches } => cmd_show(patches),
    }
}

/// Load patch sets from `--patches`, or fall back to the built-in set.
fn load_sets(patches: Option<PathBuf>) -> Result<Vec<PatchSet>> {
    match patches {
        Some(path) => Ok(config::load_all(&path)?
            .into_iter()
            .map(|(_, set)| set)
            .collect()),
        None => Ok(vec![config::builtin()?]),
    }
}

/// Pair each patch set with the target it names (or `--file`).
fn set_targets<'a>(
    sets: &'a [PatchSet],
    file: Option<&Path>,
) -> Result<Vec<(PathBuf, &'a PatchSet)>> {
    sets.iter()
        .map(|set| {
            let target = match (file, set.meta.target.as_deref()) {
                (Some(file), _) => file.to_path_buf(),
                (None, Some(target)) => PathBuf::from(target),
                (None, None) => anyhow::bail!(
                    "patch set '{}' has no meta.target; pass --file",
                    set.meta.name
                ),
            };
            Ok((target, set))
        })
        .collect()
}

/// Patch sets that share one file on disk.
struct TargetGroup<'a> {
    /// Target as first spelled by a patch set or `--file`
    label: PathBuf,
    /// Canonical path when the target validated, else the workspace-joined spelling
    key: PathBuf,
    /// Canonical path inside the workspace, or why it cannot be patched
    resolved: Result<PathBuf>,
    sets: Vec<&'a PatchSet>,
}

/// Group patch sets by the canonical file they patch, keeping set order.
///
/// `app.js` and `./app.js` land in the same group, so each file is read and
/// written at most once.
fn group_by_target<'a>(
    guard: &WorkspaceGuard,
    targets: Vec<(PathBuf, &'a PatchSet)>,
) -> Vec<TargetGroup<'a>> {
    let mut groups: Vec<TargetGroup<'a>> = Vec::new();

    for (target, set) in targets {
        let resolved = match guard.validate_path(&target) {
            Ok(path) => Ok(path),
            Err(SafetyError::NotFound(path)) => Err(PatchError::FileNotFound(path).into()),
            Err(e) => Err(e.into()),
        };
        let key = match &resolved {
            Ok(path) => path.clone(),
            Err(_) => guard.workspace_root().join(&target),
        };

        match groups.iter_mut().find(|group| group.key == key) {
            Some(group) => group.sets.push(set),
            None => groups.push(TargetGroup {
                label: target,
                key,
                resolved,
                sets: vec![set],
            }),
        }
    }

    groups
}

/// Resolve workspace path
///
/// Priority order:
/// 1. Explicit --workspace flag
/// 2. PROMPT_PATCHER_WORKSPACE environment variable
/// 3. Nearest ancestor of the current directory containing a target
/// 4. Current directory
fn resolve_workspace(cli_workspace: Option<PathBuf>, targets: &[&Path]) -> Result<PathBuf> {
    if let Some(path) = cli_workspace {
        return path
            .canonicalize()
            .with_context(|| format!("workspace {} does not exist", path.display()));
    }

    if let Ok(env_path) = env::var(WORKSPACE_ENV) {
        let path = PathBuf::from(&env_path);
        if path.exists() {
            return Ok(path.canonicalize()?);
        }
        eprintln!(
            "{}",
            format!(
                "Warning: {} is set but path doesn't exist: {}",
                WORKSPACE_ENV, env_path
            )
            .yellow()
        );
    }

    let current = env::current_dir()?;

    if let Some(path) = auto_detect_workspace(&current, targets) {
        if path != current {
            println!(
                "{}",
                format!("Auto-detected workspace: {}", path.display()).dimmed()
            );
        }
        return Ok(path);
    }

    Ok(current)
}

/// Walk up from `start` looking for a directory that holds a relative target.
fn auto_detect_workspace(start: &Path, targets: &[&Path]) -> Option<PathBuf> {
    start
        .ancestors()
        .find(|ancestor| {
            targets
                .iter()
                .filter(|target| target.is_relative())
                .any(|target| ancestor.join(target).is_file())
        })
        .map(Path::to_path_buf)
}

/// Helper: Show unified diff between original and modified content
fn display_diff(file: &Path, original: &str, modified: &str) {
    println!(
        "\n{}",
        format!("--- {} (original)", file.display()).dimmed()
    );
    println!("{}", format!("+++ {} (patched)", file.display()).dimmed());

    let diff = TextDiff::from_lines(original, modified);

    for group in diff.grouped_ops(3) {
        for op in group {
            for change in diff.iter_changes(&op) {
                let sign = match change.tag() {
                    ChangeTag::Delete => format!("-{}", change).red(),
                    ChangeTag::Insert => format!("+{}", change).green(),
                    ChangeTag::Equal => format!(" {}", change).normal(),
                };
                print!("{}", sign);
            }
        }
    }
}

/// Run every patch set of a group in one read and at most one write.
fn run_target(group: TargetGroup<'_>, mode: WriteMode) -> Result<FileOutcome> {
    let path = group.resolved?;
    Ok(patch_file(&path, &group.sets, mode)?)
}

/// Print conflict diagnostics for a failed target.
fn report_error(path: &Path, error: &anyhow::Error) {
    eprintln!("{} {}", "✗".red(), error);

    match error.downcast_ref::<PatchError>() {
        Some(PatchError::MissingAnchor { anchor, .. }) => {
            eprintln!("  {}", "CONFLICT: anchor text not found verbatim".red());
            eprintln!("  File: {}", path.display());
            if let Ok(content) = fs::read_to_string(path) {
                if let Some((line_no, line, score)) = nearest_line(&content, anchor) {
                    eprintln!(
                        "  Closest line ({:.0}% similar) at {}:{}:",
                        score * 100.0,
                        path.display(),
                        line_no
                    );
                    eprintln!("    {}", line.trim().dimmed());
                }
            }
            eprintln!("  Possible causes:");
            eprintln!("    - The file was reformatted or the entry was renamed");
            eprintln!("    - The patch set targets a different version of the file");
        }
        Some(PatchError::AmbiguousAnchor { count, .. }) => {
            eprintln!(
                "  {}",
                format!("CONFLICT: anchor matched {} locations (expected 1)", count).red()
            );
            eprintln!("  File: {}", path.display());
            eprintln!("  Action: Make the anchor text longer so it is unique");
        }
        _ => {}
    }

    eprintln!("  {}", "No changes were written.".dimmed());
}

fn cmd_apply(
    workspace: Option<PathBuf>,
    file: Option<PathBuf>,
    patches: Option<PathBuf>,
    dry_run: bool,
    show_diff: bool,
) -> Result<()> {
    let sets = load_sets(patches)?;
    let targets = set_targets(&sets, file.as_deref())?;
    let target_paths: Vec<&Path> = targets.iter().map(|(path, _)| path.as_path()).collect();

    let workspace = resolve_workspace(workspace, &target_paths)?;
    let guard = WorkspaceGuard::new(&workspace)?;
    let groups = group_by_target(&guard, targets);

    println!("Workspace: {}", guard.workspace_root().display());
    if dry_run {
        println!("{}", "[DRY RUN - nothing will be written]".cyan());
    }
    println!();

    let mode = if dry_run {
        WriteMode::Check
    } else {
        WriteMode::Apply
    };

    let mut total_applied = 0;
    let mut total_already_applied = 0;
    let mut total_failed = 0;

    for group in groups {
        println!("Patching {}...", group.label.display());

        let key = group.key.clone();
        let outcome = match run_target(group, mode) {
            Ok(outcome) => outcome,
            Err(e) => {
                report_error(&key, &e);
                total_failed += 1;
                println!();
                continue;
            }
        };

        for report in &outcome.reports {
            match report.result {
                StepResult::Applied { .. } => {
                    let verb = if dry_run { "Would apply" } else { "Applied" };
                    println!("{} {}/{}: {}", "✓".green(), report.set, report.id, verb);
                    total_applied += 1;
                }
                StepResult::AlreadyApplied => {
                    println!(
                        "{} {}/{}: Already applied",
                        "⊙".yellow(),
                        report.set,
                        report.id
                    );
                    total_already_applied += 1;
                }
            }
        }

        if show_diff && outcome.changed() {
            display_diff(&outcome.path, &outcome.original, &outcome.patched);
        }

        println!();
    }

    println!("{}", "Summary:".bold());
    println!("  {} applied", format!("{}", total_applied).green());
    println!(
        "  {} already applied",
        format!("{}", total_already_applied).yellow()
    );
    println!("  {} failed", format!("{}", total_failed).red());

    if total_failed > 0 {
        std::process::exit(1);
    }

    Ok(())
}

fn cmd_check(
    workspace: Option<PathBuf>,
    file: Option<PathBuf>,
    patches: Option<PathBuf>,
) -> Result<()> {
    let sets = load_sets(patches)?;
    let targets = set_targets(&sets, file.as_deref())?;
    let target_paths: Vec<&Path> = targets.iter().map(|(path, _)| path.as_path()).collect();

    let workspace = resolve_workspace(workspace, &target_paths)?;
    let guard = WorkspaceGuard::new(&workspace)?;
    let groups = group_by_target(&guard, targets);

    println!("{}", "Patch Status Report".bold());
    println!("Workspace: {}", guard.workspace_root().display());
    println!();

    let mut applied = 0;
    let mut pending = 0;
    let mut broken = 0;

    for group in groups {
        println!("{}", group.label.display());

        let key = group.key.clone();
        match run_target(group, WriteMode::Check) {
            Ok(outcome) => {
                for report in &outcome.reports {
                    match report.result {
                        StepResult::AlreadyApplied => {
                            println!("  {} {}/{}", "✓".green(), report.set, report.id);
                            applied += 1;
                        }
                        StepResult::Applied { .. } => {
                            println!(
                                "  {} {}/{} ({})",
                                "⊙".yellow(),
                                report.set,
                                report.id,
                                "not applied".dimmed()
                            );
                            pending += 1;
                        }
                    }
                }
            }
            Err(e) => {
                report_error(&key, &e);
                broken += 1;
            }
        }

        println!();
    }

    println!("{}", "Summary:".bold());
    println!("  {} applied", format!("{}", applied).green());
    println!("  {} not applied", format!("{}", pending).yellow());
    println!("  {} broken", format!("{}", broken).red());

    if pending > 0 || broken > 0 {
        std::process::exit(1);
    }

    Ok(())
}

fn cmd_show(patches: Option<PathBuf>) -> Result<()> {
    let sets = load_sets(patches)?;

    for set in &sets {
        println!("{}", set.meta.name.bold());
        if let Some(description) = &set.meta.description {
            println!("  {}", description.dimmed());
        }
        if let Some(target) = &set.meta.target {
            println!("  target: {}", target);
        }

        for (idx, step) in set.steps.iter().enumerate() {
            println!(
                "  {}. {} [{}]",
                idx + 1,
                step.id.cyan(),
                step.operation.kind()
            );
            if let Some(description) = &step.description {
                println!("     {}", description);
            }
            println!("     guard:  {:?}", step.guard);
            println!("     anchor: {}", step.anchor.display_label());
        }
        println!();
    }

    Ok(())
}
