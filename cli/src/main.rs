use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use log::error;
use log::info;
use log::warn;

use pkgdepdb::Db;
use pkgdepdb::ObjectFilter;
use pkgdepdb::PackageFilter;
use pkgdepdb::PackageAxis;
use pkgdepdb::StringFilter;

mod config;
mod loader;
mod logger;
mod rules;
mod show;

use self::config::str2bool;
use self::config::Config;
use self::loader::load_package;
use self::loader::LoaderOptions;
use self::logger::Logger;
use self::rules::parse_filter;
use self::rules::parse_rule;
use self::rules::Filter;

#[derive(clap::Parser)]
#[clap(version, about = "Track installed packages and their ELF dependencies")]
struct Args {
    /// Database file to commit to.
    #[clap(short = 'd', long = "db", value_name = "FILE")]
    db: Option<PathBuf>,

    /// Print more information; repeat for debug output.
    #[clap(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress progress messages.
    #[clap(short = 'q', long = "quiet")]
    quiet: bool,

    /// Install package directories into the database.
    #[clap(short = 'i', long = "install")]
    install: bool,

    /// Remove packages (by name) from the database.
    #[clap(short = 'r', long = "remove")]
    remove: bool,

    /// Do not commit changes to the database file.
    #[clap(long = "dry")]
    dry: bool,

    /// Write the database even without modifications.
    #[clap(long = "touch")]
    touch: bool,

    /// Remove all packages, keep rules and settings.
    #[clap(long = "wipe")]
    wipe: bool,

    /// Show general information about the database.
    #[clap(short = 'I', long = "info")]
    info: bool,

    /// List object files.
    #[clap(short = 'L', long = "list")]
    list: bool,

    /// Show the `missing` table.
    #[clap(short = 'M', long = "missing")]
    missing: bool,

    /// Show the `found` table.
    #[clap(short = 'F', long = "found")]
    found: bool,

    /// Show the installed packages.
    #[clap(short = 'P', long = "pkgs")]
    pkgs: bool,

    /// Show package filelists.
    #[clap(long = "ls")]
    ls: bool,

    /// Perform a dependency integrity check.
    #[clap(long = "integrity")]
    integrity: bool,

    /// Re-run the linker over the whole database.
    #[clap(long = "relink")]
    relink: bool,

    /// Normalize stored rpaths/runpaths, then relink.
    #[clap(long = "fixpaths")]
    fixpaths: bool,

    /// Rename the database.
    #[clap(short = 'n', long = "rename", value_name = "NAME")]
    rename: Option<String>,

    /// Only consider broken packages or objects.
    #[clap(short = 'b', long = "broken")]
    broken: bool,

    /// Skip packages with no object matching the filters.
    #[clap(long = "not-empty")]
    not_empty: bool,

    /// Modify a rule, e.g. `assume-found:libGL.so*` or `strict:yes`.
    #[clap(short = 'R', long = "rule", value_name = "CMD")]
    rules: Vec<String>,

    /// Filter queried packages/objects, e.g. `name:lib*` or `!broken`.
    #[clap(short = 'f', long = "filter", value_name = "FILT")]
    filters: Vec<String>,

    /// Append a directory to the trusted library path.
    #[clap(long = "ld-append", value_name = "DIR")]
    ld_append: Vec<String>,

    /// Prepend a directory to the trusted library path.
    #[clap(long = "ld-prepend", value_name = "DIR")]
    ld_prepend: Vec<String>,

    /// Insert a directory at a position: `POS:DIR`.
    #[clap(long = "ld-insert", value_name = "POS:DIR")]
    ld_insert: Vec<String>,

    /// Delete a directory from the trusted library path.
    #[clap(long = "ld-delete", value_name = "DIR")]
    ld_delete: Vec<String>,

    /// Clear the trusted library path.
    #[clap(long = "ld-clear")]
    ld_clear: bool,

    /// Whether to record package filelists on install.
    #[clap(long = "files", value_name = "BOOL")]
    files: Option<String>,

    /// Shorthand for `--files=no`.
    #[clap(long = "no-files")]
    no_files: bool,

    /// Clear all stored filelists.
    #[clap(long = "rm-files")]
    rm_files: bool,

    /// Whether to record package dependency lists on install.
    #[clap(long = "depends", value_name = "BOOL")]
    depends: Option<String>,

    /// Use up to N threads when relinking.
    #[clap(short = 'j', long = "jobs", value_name = "N")]
    jobs: Option<usize>,

    /// Package directories (with --install) or package names (with
    /// --remove).
    #[clap(value_name = "packages")]
    packages: Vec<String>,
}

fn main() -> ExitCode {
    match do_main() {
        Ok(ok) => {
            if ok {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Err(e) => {
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn do_main() -> Result<bool, Box<dyn std::error::Error>> {
    let args = Args::parse();
    let mut config = Config::read();
    if args.verbose > 0 {
        config.verbosity = args.verbose as u32;
    }
    if args.quiet {
        config.quiet = true;
    }
    if let Some(jobs) = args.jobs {
        config.max_jobs = jobs;
    }
    if let Some(files) = &args.files {
        config.package_filelist = str2bool(files);
    }
    if args.no_files {
        config.package_filelist = false;
    }
    if let Some(depends) = &args.depends {
        config.package_depends = str2bool(depends);
    }
    Logger::init(config.verbosity, config.quiet)?;

    // Filter syntax errors abort before any database mutation.
    let mut pkg_filters: Vec<PackageFilter> = Vec::new();
    let mut obj_filters: Vec<ObjectFilter> = Vec::new();
    let mut str_filters: Vec<StringFilter> = Vec::new();
    for text in &args.filters {
        match parse_filter(text)? {
            Filter::Pkg(f) => pkg_filters.push(f),
            Filter::Obj(f) => obj_filters.push(f),
            Filter::Str(f) => str_filters.push(f),
        }
    }
    if args.broken {
        pkg_filters.push(PackageFilter::new(PackageAxis::Broken, None, false));
    }

    let Some(db_path) = args.db.clone().or_else(|| config.database.clone()) else {
        return Err("no database file selected; use --db or the config file".into());
    };

    let mut db = Db::new();
    db.load(&db_path)?;
    let mut modified = false;

    if let Some(name) = &args.rename {
        modified |= db.rename(name.clone());
    }

    if args.ld_clear {
        modified |= db.ld_clear();
    }
    for dir in &args.ld_prepend {
        modified |= db.ld_prepend(dir.clone());
    }
    for spec in &args.ld_insert {
        let (pos, dir) = spec
            .split_once(':')
            .ok_or_else(|| format!("invalid --ld-insert: `{spec}`"))?;
        let pos: usize = pos
            .parse()
            .map_err(|_| format!("invalid --ld-insert: `{spec}`"))?;
        modified |= db.ld_insert(dir, pos);
    }
    for dir in &args.ld_append {
        modified |= db.ld_append(dir.clone());
    }
    for dir in &args.ld_delete {
        modified |= db.ld_delete(dir);
    }

    for rule in &args.rules {
        modified |= parse_rule(&mut db, rule)?;
    }

    if args.wipe {
        modified |= db.wipe_packages();
    }
    if args.rm_files {
        modified |= db.wipe_filelists();
    }

    let mut had_errors = false;
    if args.install {
        let options = LoaderOptions {
            with_depends: config.package_depends,
            with_filelist: config.package_filelist,
        };
        for dir in &args.packages {
            match load_package(dir.as_ref(), &db, &options) {
                Ok(loaded) => {
                    info!("installing {} {}", loaded.pkg.name, loaded.pkg.version);
                    db.install_package(loaded.pkg, loaded.objects);
                    modified = true;
                }
                Err(e) => {
                    error!("{e}");
                    had_errors = true;
                }
            }
        }
    } else if args.remove {
        for name in &args.packages {
            if db.delete_package(name) {
                modified = true;
            } else {
                warn!("no such package: {name}");
            }
        }
    }

    if args.fixpaths {
        info!("fixing up path entries");
        db.fix_paths();
        modified = true;
    } else if args.relink {
        info!("relinking everything");
        if config.max_jobs > 1 {
            db.relink_all_threaded(config.max_jobs);
        } else {
            db.relink_all();
        }
        modified = true;
    }

    if args.info {
        show::show_info(&db);
    }
    if args.pkgs {
        show::show_packages(
            &db,
            &pkg_filters,
            &obj_filters,
            args.not_empty,
            config.verbosity > 0,
        );
    }
    if args.list {
        show::show_objects(&db, &obj_filters, args.broken, config.verbosity > 0);
    }
    if args.missing {
        show::show_missing(&db, &obj_filters);
    }
    if args.found {
        show::show_found(&db, &obj_filters);
    }
    if args.ls {
        show::show_filelists(&db, &pkg_filters, &str_filters);
    }
    if args.integrity {
        had_errors |= !show::show_integrity(&db, &pkg_filters, &obj_filters);
    }

    if (modified || args.touch) && !args.dry {
        db.store(&db_path)?;
    }
    Ok(!had_errors)
}
