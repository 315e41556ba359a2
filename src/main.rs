use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;
use dashpatch::manifest::{
    apply_manifest, check_manifest, load_from_path, ApplyError, ApplyOptions, Manifest,
    Metadata, OccurrenceMode, Operation, PatchDescriptor, PatchOutcome, Query,
};
use serde_json::json;
use similar::{ChangeTag, TextDiff};
use std::collections::BTreeSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

#[derive(Parser)]
#[command(name = "dashpatch")]
#[command(about = "Declarative text patching for dashboard source files", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply patch manifests to a project
    Apply {
        /// Path to project root (auto-detected if not specified)
        #[arg(short, long)]
        project: Option<PathBuf>,

        /// Specific manifest to apply (otherwise applies all in patches/)
        #[arg(short, long)]
        manifest: Option<PathBuf>,

        /// Dry run - show what would change without modifying files
        #[arg(short = 'n', long)]
        dry_run: bool,

        /// Show unified diff of changes
        #[arg(short, long)]
        diff: bool,

        /// Treat "no match" as a hard failure
        #[arg(long)]
        strict: bool,

        /// Emit a machine-readable report ("json")
        #[arg(long)]
        report: Option<String>,
    },

    /// Apply a single ad-hoc patch without a manifest
    Patch {
        /// Target file
        #[arg(short, long)]
        file: PathBuf,

        /// Literal text to find
        #[arg(short = 'm', long = "match", conflicts_with = "pattern")]
        search: Option<String>,

        /// Regex to find (dot matches newline)
        #[arg(short = 'p', long, conflicts_with = "search")]
        pattern: Option<String>,

        /// Replacement text (regex matchers expand $1 references)
        #[arg(short, long)]
        replace: String,

        /// Which occurrences to patch
        #[arg(long, default_value = "first")]
        mode: String,

        /// Print the would-be diff without writing
        #[arg(short = 'n', long)]
        dry_run: bool,
    },

    /// Report per-patch state without applying
    Status {
        /// Path to project root (auto-detected if not specified)
        #[arg(short, long)]
        project: Option<PathBuf>,
    },

    /// List discovered manifests and their patch ids
    List {
        /// Path to project root (auto-detected if not specified)
        #[arg(short, long)]
        project: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Apply {
            project,
            manifest,
            dry_run,
            diff,
            strict,
            report,
        } => cmd_apply(project, manifest, dry_run, diff, strict, report),

        Commands::Patch {
            file,
            search,
            pattern,
            replace,
            mode,
            dry_run,
        } => cmd_patch(file, search, pattern, replace, mode, dry_run),

        Commands::Status { project } => cmd_status(project),

        Commands::List { project } => cmd_list(project),
    }
}

/// Helper: Discover all .toml manifests in a patches/ directory.
///
/// Discovery order:
/// 1. `<project>/patches` (manifests kept alongside the target files).
/// 2. `./patches` relative to the current working directory.
fn discover_manifests(project: &Path) -> Result<Vec<PathBuf>> {
    let cwd_patches_dir = env::current_dir().ok().map(|cwd| cwd.join("patches"));
    let project_patches_dir = project.join("patches");

    let candidate_dirs: Vec<PathBuf> = std::iter::once(project_patches_dir)
        .chain(cwd_patches_dir)
        .collect();

    for patches_dir in candidate_dirs {
        if !patches_dir.exists() {
            continue;
        }

        let mut files = Vec::new();
        for entry in WalkDir::new(&patches_dir).max_depth(1) {
            let entry = entry?;
            if entry.file_type().is_file()
                && entry.path().extension().and_then(|s| s.to_str()) == Some("toml")
            {
                files.push(entry.path().to_path_buf());
            }
        }

        files.sort();

        if !files.is_empty() {
            return Ok(files);
        }
    }

    anyhow::bail!(
        "No .toml manifests found in either ./patches or {}/patches",
        project.display()
    )
}

/// Resolve the project root using multiple detection strategies
///
/// Priority order:
/// 1. Explicit --project flag
/// 2. DASHPATCH_PROJECT environment variable
/// 3. Auto-detect by walking up from the current directory
fn resolve_project(cli_project: Option<PathBuf>) -> Result<PathBuf> {
    // 1. Explicit flag (highest priority)
    if let Some(path) = cli_project {
        return Ok(path.canonicalize()?);
    }

    // 2. Environment variable
    if let Ok(env_path) = env::var("DASHPATCH_PROJECT") {
        let path = PathBuf::from(&env_path);
        if path.exists() {
            return Ok(path.canonicalize()?);
        }
        eprintln!(
            "{}",
            format!(
                "Warning: DASHPATCH_PROJECT is set but path doesn't exist: {}",
                env_path
            )
            .yellow()
        );
    }

    // 3. Auto-detect from current directory
    if let Some(path) = auto_detect_project() {
        println!(
            "{}",
            format!("Auto-detected project: {}", path.display()).dimmed()
        );
        return Ok(path);
    }

    anyhow::bail!(
        "{}\n{}\n  {}\n  {}\n  {}",
        "Could not find a dashboard project.".red(),
        "Try one of:".bold(),
        "1. cd into your project directory: cd /path/to/dashboard && dashpatch apply",
        "2. Specify explicitly: dashpatch apply --project /path/to/dashboard",
        "3. Set environment variable: export DASHPATCH_PROJECT=/path/to/dashboard"
    )
}

/// Auto-detect the project by walking up looking for package.json.
fn auto_detect_project() -> Option<PathBuf> {
    let current = env::current_dir().ok()?;

    for ancestor in current.ancestors() {
        if ancestor.join("package.json").exists() {
            return Some(ancestor.to_path_buf());
        }
    }

    None
}

/// Helper: Show unified diff between original and modified content
fn display_diff(file: &Path, original: &str, modified: &str) {
    println!(
        "\n{}",
        format!("--- {} (original)", file.display()).dimmed()
    );
    println!("{}", format!("+++ {} (patched)", file.display()).dimmed());

    let diff = TextDiff::from_lines(original, modified);

    for change in diff.iter_all_changes() {
        let sign = match change.tag() {
            ChangeTag::Delete => format!("-{}", change).red(),
            ChangeTag::Insert => format!("+{}", change).green(),
            ChangeTag::Equal => format!(" {}", change).normal(),
        };
        print!("{}", sign);
    }
}

/// Resolved target files a manifest touches, for diff capture.
fn target_files(manifest: &Manifest, project: &Path) -> BTreeSet<PathBuf> {
    manifest
        .patches
        .iter()
        .map(|p| {
            if manifest.meta.project_relative {
                project.join(&p.file)
            } else {
                PathBuf::from(&p.file)
            }
        })
        .collect()
}

/// Mirror the manifest's target files into a temp root so a dry run can
/// produce a real diff without touching the project.
fn build_shadow_project(
    manifest: &Manifest,
    project: &Path,
) -> Result<Option<tempfile::TempDir>> {
    if !manifest.meta.project_relative {
        // Absolute-path manifests have no root to mirror under.
        return Ok(None);
    }

    let shadow = tempfile::tempdir()?;
    for patch in &manifest.patches {
        let source = project.join(&patch.file);
        if !source.exists() {
            continue;
        }
        let dest = shadow.path().join(&patch.file);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(&source, &dest)?;
    }
    Ok(Some(shadow))
}

/// Apply a single-patch manifest to a temp copy of `file` and return the
/// patched content, for dry-run diff display.
fn patch_scratch_copy(
    manifest: &Manifest,
    file: &Path,
    original: &str,
) -> Result<Option<String>> {
    let scratch = tempfile::tempdir()?;
    let name = file
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "scratch.tmp".into());
    let scratch_file = scratch.path().join(name);
    fs::write(&scratch_file, original)?;

    let mut shadow = manifest.clone();
    for patch in &mut shadow.patches {
        patch.file = scratch_file.display().to_string();
    }
    apply_manifest(
        &shadow,
        scratch.path(),
        ApplyOptions {
            dry_run: false,
            strict: false,
        },
    );

    let patched = fs::read_to_string(&scratch_file)?;
    Ok((patched != original).then_some(patched))
}

struct Tally {
    applied: usize,
    already_applied: usize,
    no_match: usize,
    failed: usize,
}

impl Tally {
    fn new() -> Self {
        Self {
            applied: 0,
            already_applied: 0,
            no_match: 0,
            failed: 0,
        }
    }
}

/// Print one patch result, updating counters, and return a JSON record.
fn report_result(
    patch_id: &str,
    result: &Result<PatchOutcome, ApplyError>,
    dry_run: bool,
    tally: &mut Tally,
) -> serde_json::Value {
    match result {
        Ok(PatchOutcome::Applied {
            file,
            matches,
            bytes_before,
            bytes_after,
        }) => {
            let verb = if dry_run { "Would apply" } else { "Applied" };
            println!(
                "{} {}: {} to {} ({} match{}, {} -> {} bytes)",
                "✓".green(),
                patch_id,
                verb,
                file.display(),
                matches,
                if *matches == 1 { "" } else { "es" },
                bytes_before,
                bytes_after
            );
            tally.applied += 1;
            json!({
                "id": patch_id,
                "status": "applied",
                "file": file,
                "matches": matches,
                "bytes_before": bytes_before,
                "bytes_after": bytes_after,
            })
        }
        Ok(PatchOutcome::AlreadyApplied { file }) => {
            println!(
                "{} {}: Already applied to {}",
                "⊙".yellow(),
                patch_id,
                file.display()
            );
            tally.already_applied += 1;
            json!({ "id": patch_id, "status": "already-applied", "file": file })
        }
        Ok(PatchOutcome::NoMatch { file, snippet }) => {
            println!(
                "{} {}: No match in {}",
                "⊘".yellow(),
                patch_id,
                file.display()
            );
            if let Some(snippet) = snippet {
                println!("  Scanned region:");
                for line in snippet.lines() {
                    println!("  {}", format!("| {}", line).dimmed());
                }
            }
            tally.no_match += 1;
            json!({ "id": patch_id, "status": "no-match", "file": file })
        }
        Ok(PatchOutcome::Failed { file, reason }) => {
            eprintln!("{} {}: Failed - {}", "✗".red(), patch_id, reason);
            eprintln!("  File: {}", file.display());
            tally.failed += 1;
            json!({ "id": patch_id, "status": "failed", "file": file, "reason": reason })
        }
        Err(e) => {
            eprintln!("{} {}: Error - {}", "✗".red(), patch_id, e);
            tally.failed += 1;

            // Conflict diagnostics for the common failure shapes
            match e {
                ApplyError::NoMatch { file } => {
                    eprintln!("  {}", "CONFLICT: matcher found nothing (strict)".red());
                    eprintln!("  File: {}", file.display());
                    eprintln!("  Possible causes:");
                    eprintln!("    - Patch was already applied and strict mode is on");
                    eprintln!("    - Target fragment was rewritten upstream");
                }
                ApplyError::AmbiguousMatch { file, detail } => {
                    eprintln!("  {}", format!("CONFLICT: {}", detail).red());
                    eprintln!("  File: {}", file.display());
                    eprintln!("  Action: make the matcher more specific, narrow the window,");
                    eprintln!("          or use mode = \"all\" to patch every occurrence");
                }
                _ => {}
            }
            json!({ "id": patch_id, "status": "error", "reason": e.to_string() })
        }
    }
}

fn cmd_apply(
    project: Option<PathBuf>,
    manifest_path: Option<PathBuf>,
    dry_run: bool,
    show_diff: bool,
    strict: bool,
    report: Option<String>,
) -> Result<()> {
    let json_report = match report.as_deref() {
        None => false,
        Some("json") => true,
        Some(other) => anyhow::bail!("unsupported report format: {other} (expected \"json\")"),
    };

    let project = resolve_project(project)?;

    let manifest_files = if let Some(path) = manifest_path {
        vec![path]
    } else {
        discover_manifests(&project)?
    };

    println!("Project: {}", project.display());
    println!();

    let mut tally = Tally::new();
    let mut json_records = Vec::new();

    for manifest_file in manifest_files {
        println!("Loading patches from {}...", manifest_file.display());

        let manifest = load_from_path(&manifest_file)?;

        if dry_run {
            println!("{}", "  [DRY RUN - no project files will change]".cyan());
        }

        // Capture original contents of targeted files for diff output.
        let mut before: Vec<(PathBuf, String)> = Vec::new();
        if show_diff {
            for file in target_files(&manifest, &project) {
                if let Ok(content) = fs::read_to_string(&file) {
                    before.push((file, content));
                }
            }
        }

        let options = ApplyOptions { dry_run, strict };

        // A dry run with --diff applies against a shadow copy of the
        // targeted files so the real would-be diff can be shown.
        let results = if dry_run && show_diff {
            match build_shadow_project(&manifest, &project)? {
                Some(shadow) => {
                    let results = apply_manifest(
                        &manifest,
                        shadow.path(),
                        ApplyOptions {
                            dry_run: false,
                            strict,
                        },
                    );
                    for (file, original) in &before {
                        let rel = file.strip_prefix(&project).unwrap_or(file);
                        if let Ok(patched) = fs::read_to_string(shadow.path().join(rel)) {
                            if original != &patched {
                                display_diff(file, original, &patched);
                            }
                        }
                    }
                    results
                }
                None => {
                    eprintln!(
                        "{}",
                        "Warning: --diff with --dry-run needs project_relative paths; skipping diff"
                            .yellow()
                    );
                    apply_manifest(&manifest, &project, options)
                }
            }
        } else {
            apply_manifest(&manifest, &project, options)
        };

        for (patch_id, result) in &results {
            json_records.push(report_result(patch_id, result, dry_run, &mut tally));

            if show_diff && !dry_run {
                if let Ok(PatchOutcome::Applied { file, .. }) = result {
                    if let Some((_, original)) = before.iter().find(|(f, _)| f == file) {
                        if let Ok(patched) = fs::read_to_string(file) {
                            if original != &patched {
                                display_diff(file, original, &patched);
                            }
                        }
                    }
                }
            }
        }

        println!();
    }

    println!("{}", "Summary:".bold());
    println!("  {} applied", format!("{}", tally.applied).green());
    println!(
        "  {} already applied",
        format!("{}", tally.already_applied).yellow()
    );
    println!("  {} no match", format!("{}", tally.no_match).yellow());
    println!("  {} failed", format!("{}", tally.failed).red());

    if json_report {
        println!("{}", serde_json::to_string_pretty(&json_records)?);
    }

    if tally.failed > 0 {
        std::process::exit(1);
    }

    Ok(())
}

/// One-off patch without a manifest. Per the command contract, a missing
/// match here is a hard error: the operator named one exact edit.
fn cmd_patch(
    file: PathBuf,
    search: Option<String>,
    pattern: Option<String>,
    replace: String,
    mode: String,
    dry_run: bool,
) -> Result<()> {
    let mode = match mode.as_str() {
        "first" => OccurrenceMode::First,
        "all" => OccurrenceMode::All,
        other => anyhow::bail!("invalid mode: {other} (expected \"first\" or \"all\")"),
    };

    let query = match (search, pattern) {
        (Some(search), None) => Query::Literal { search },
        (None, Some(pattern)) => Query::Pattern { pattern },
        _ => anyhow::bail!("exactly one of --match or --pattern is required"),
    };

    let manifest = Manifest {
        meta: Metadata {
            name: "ad-hoc".to_string(),
            description: None,
            project_relative: false,
            strict: true,
        },
        patches: vec![PatchDescriptor {
            id: "ad-hoc".to_string(),
            file: file.display().to_string(),
            query,
            operation: Operation::Replace {
                text: replace,
                mode,
                then_text: None,
            },
        }],
    };

    let original = fs::read_to_string(&file).ok();

    let cwd = env::current_dir()?;
    let options = ApplyOptions {
        dry_run,
        strict: true,
    };
    let results = apply_manifest(&manifest, &cwd, options);

    let mut tally = Tally::new();
    for (patch_id, result) in &results {
        report_result(patch_id, result, dry_run, &mut tally);

        match (result, &original) {
            (Ok(PatchOutcome::Applied { .. }), Some(original)) if !dry_run => {
                if let Ok(patched) = fs::read_to_string(&file) {
                    display_diff(&file, original, &patched);
                }
            }
            // Dry run: re-apply against a scratch copy so the would-be
            // diff can be shown without touching the target.
            (Ok(PatchOutcome::Applied { .. }), Some(original)) => {
                if let Some(patched) = patch_scratch_copy(&manifest, &file, original)? {
                    display_diff(&file, original, &patched);
                }
            }
            _ => {}
        }
    }

    if tally.failed > 0 {
        std::process::exit(1);
    }

    Ok(())
}

fn cmd_status(project: Option<PathBuf>) -> Result<()> {
    let project = resolve_project(project)?;
    let manifest_files = discover_manifests(&project)?;

    println!("{}", "Patch Status Report".bold());
    println!("Project: {}", project.display());
    println!();

    let mut applied = Vec::new();
    let mut pending = Vec::new();
    let mut failing = Vec::new();

    // Read-only: every manifest is evaluated against temp copies.
    for manifest_file in manifest_files {
        let manifest = load_from_path(&manifest_file)?;
        let results = check_manifest(&manifest, &project, false);

        for (patch_id, result) in results {
            match result {
                Ok(PatchOutcome::Applied { .. }) => {
                    // Target found and would change if applied.
                    pending.push(patch_id);
                }
                Ok(PatchOutcome::AlreadyApplied { .. }) => {
                    applied.push(patch_id);
                }
                Ok(PatchOutcome::NoMatch { .. }) => {
                    failing.push((patch_id, "no match".to_string()));
                }
                Ok(PatchOutcome::Failed { reason, .. }) => {
                    failing.push((patch_id, reason));
                }
                Err(e) => {
                    failing.push((patch_id, e.to_string()));
                }
            }
        }
    }

    if !applied.is_empty() {
        println!(
            "{} {} ({} patches)",
            "✓".green(),
            "APPLIED".green().bold(),
            applied.len()
        );
        for id in &applied {
            println!("  - {}", id);
        }
        println!();
    }

    if !pending.is_empty() {
        println!(
            "{} {} ({} patches)",
            "⊙".yellow(),
            "PENDING".yellow().bold(),
            pending.len()
        );
        for id in &pending {
            println!("  - {}", id);
        }
        println!();
    }

    if !failing.is_empty() {
        println!(
            "{} {} ({} patches)",
            "✗".red(),
            "FAILING".red().bold(),
            failing.len()
        );
        for (id, reason) in &failing {
            println!("  - {} ({})", id, reason.dimmed());
        }
        println!();
    }

    Ok(())
}

fn cmd_list(project: Option<PathBuf>) -> Result<()> {
    let project = resolve_project(project)?;
    let manifest_files = discover_manifests(&project)?;

    for manifest_file in manifest_files {
        match load_from_path(&manifest_file) {
            Ok(manifest) => {
                let name = if manifest.meta.name.is_empty() {
                    manifest_file.display().to_string()
                } else {
                    manifest.meta.name.clone()
                };
                println!("{} ({})", name.bold(), manifest_file.display());
                if let Some(description) = &manifest.meta.description {
                    println!("  {}", description.dimmed());
                }
                for patch in &manifest.patches {
                    println!("  - {} -> {}", patch.id, patch.file);
                }
            }
            Err(e) => {
                eprintln!(
                    "{} {}: {}",
                    "✗".red(),
                    manifest_file.display(),
                    e
                );
            }
        }
        println!();
    }

    Ok(())
}
