use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::error::{DumpError, DumpResult};
use crate::filter::ClassFilter;
use crate::force_branch::ForceBranchController;
use crate::hooks::MethodTracer;
use crate::records::hash_str;
use crate::source::{MethodInfo, MethodSignature, SourceUnit};
use crate::store::{FileNaming, SymbolStore};
use crate::writer::RecordWriter;

pub const FORCE_BRANCHES_FILE: &str = "force_branches";
pub const OUTPUT_DIR_NAME: &str = "revealer";

#[derive(Debug, Clone)]
pub struct DumperConfig {
    /// Where the `.dat` table files are appended.
    pub output_dir: PathBuf,
    /// Holds the filter and rule files, and receives raw dex/so copies.
    pub package_dir: PathBuf,
    pub pid: u32,
    pub random_prefix: Option<String>,
    pub write_records: bool,
}

impl Default for DumperConfig {
    fn default() -> Self {
        Self::for_package_dir(PathBuf::from("."))
    }
}

impl DumperConfig {
    pub fn for_package_dir(package_dir: PathBuf) -> Self {
        Self {
            output_dir: package_dir.join(OUTPUT_DIR_NAME),
            package_dir,
            pid: std::process::id(),
            random_prefix: None,
            write_records: true,
        }
    }
}

/// Process-wide instrumentation context shared by every traced activation.
pub struct Dumper {
    config: DumperConfig,
    store: SymbolStore,
    filter: RwLock<ClassFilter>,
    force_branches: ForceBranchController,
}

impl Dumper {
    pub fn start(config: DumperConfig) -> DumpResult<Arc<Self>> {
        std::fs::create_dir_all(&config.output_dir).map_err(|source| DumpError::Io {
            path: config.output_dir.clone(),
            source,
        })?;
        let writer = if config.write_records {
            Some(RecordWriter::spawn().map_err(|source| DumpError::Io {
                path: config.output_dir.clone(),
                source,
            })?)
        } else {
            None
        };
        let naming = FileNaming::new(
            config.output_dir.clone(),
            config.pid,
            config.random_prefix.clone(),
        );
        info!(
            output = %config.output_dir.display(),
            pid = config.pid,
            prefix = naming.prefix(),
            "dumper started"
        );

        let dumper = Arc::new(Self {
            filter: RwLock::new(ClassFilter::load(&config.package_dir)),
            store: SymbolStore::new(naming, writer),
            force_branches: ForceBranchController::new(),
            config,
        });
        dumper.reload_force_branches();
        Ok(dumper)
    }

    pub fn config(&self) -> &DumperConfig {
        &self.config
    }

    pub fn store(&self) -> &SymbolStore {
        &self.store
    }

    pub fn force_branches(&self) -> &ForceBranchController {
        &self.force_branches
    }

    pub fn should_trace(&self, class_descriptor: &str) -> bool {
        self.filter.read().should_trace(class_descriptor)
    }

    pub fn force_execution(&self) -> bool {
        self.force_branches.force_execution()
    }

    /// Starts tracing an activation when its declaring class passes the filter.
    pub fn begin_method<'a>(
        &'a self,
        unit: &'a dyn SourceUnit,
        method: MethodInfo,
    ) -> Option<MethodTracer<'a>> {
        let class_idx = unit.method_id(method.method_idx)?.class_idx;
        let descriptor = unit.type_descriptor(class_idx)?;
        if !self.should_trace(descriptor) {
            return None;
        }
        Some(MethodTracer::new(self, unit, method))
    }

    pub fn resolve_force_branch(
        &self,
        unit: &dyn SourceUnit,
        method_idx: u32,
        pc: u32,
    ) -> Option<i32> {
        self.force_branches
            .resolve(pc, || MethodSignature::resolve(unit, method_idx))
    }

    /// Re-reads `force_branches` from the package directory, replacing the table.
    pub fn reload_force_branches(&self) -> usize {
        let path = self.config.package_dir.join(FORCE_BRANCHES_FILE);
        match std::fs::read_to_string(&path) {
            Ok(text) => {
                let count = self.force_branches.load(&text);
                info!(path = %path.display(), count, "force branches loaded");
                count
            }
            Err(err) => {
                if err.kind() == std::io::ErrorKind::NotFound {
                    debug!(path = %path.display(), "no force branches");
                } else {
                    warn!(path = %path.display(), error = %err, "force branches unreadable");
                }
                self.force_branches.clear();
                0
            }
        }
    }

    pub fn reload_class_filter(&self) {
        *self.filter.write() = ClassFilter::load(&self.config.package_dir);
    }

    /// Writes an in-memory dex image to `dump_<hash>.dex`.
    pub fn dump_dex_file(&self, location: &str, bytes: &[u8]) -> Option<PathBuf> {
        let path = self.raw_copy_path(location, "dex");
        match std::fs::write(&path, bytes) {
            Ok(()) => {
                info!(location, path = %path.display(), size = bytes.len(), "dex copied");
                Some(path)
            }
            Err(err) => {
                warn!(location, path = %path.display(), error = %err, "dex copy failed");
                None
            }
        }
    }

    /// Copies a loaded native library to `dump_<hash>.so`.
    pub fn dump_jni_library(&self, location: &Path) -> Option<PathBuf> {
        let path = self.raw_copy_path(&location.to_string_lossy(), "so");
        match std::fs::copy(location, &path) {
            Ok(size) => {
                info!(location = %location.display(), path = %path.display(), size, "library copied");
                Some(path)
            }
            Err(err) => {
                warn!(location = %location.display(), path = %path.display(), error = %err, "library copy failed");
                None
            }
        }
    }

    fn raw_copy_path(&self, location: &str, extension: &str) -> PathBuf {
        self.config
            .package_dir
            .join(format!("dump_{}.{extension}", hash_str(location)))
    }

    /// Blocks until every record queued so far is on disk.
    pub fn flush(&self) {
        self.store.flush();
    }

    pub fn shutdown(&self) {
        self.store.shutdown();
        info!("dumper stopped");
    }
}
