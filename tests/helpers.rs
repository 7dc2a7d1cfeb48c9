//! Shared test utilities for winmedia tests.
//!
//! The fakes stand in for wimlib, the archive tools and the disk utilities.
//! A fake WIM is a small text header (`FAKEWIM` then one `index<TAB>name`
//! line per image), optionally padded to a large sparse size; the content of
//! each index lives in a store directory owned by [`FakeImageTool`].

#![allow(dead_code)]

use anyhow::{bail, Context, Result};
use sha2::{Digest, Sha256};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tempfile::TempDir;
use walkdir::WalkDir;

use winmedia::common::copy_dir_recursive;
use winmedia::config::Config;
use winmedia::drivers::ArchiveExtractor;
use winmedia::image::{ImageTool, IndexInfo, MIB};
use winmedia::provision::{ConfirmedTarget, DiskTool};
use winmedia::tracker::{MountReleaser, ResourceTracker};

pub const GIB: u64 = 1024 * MIB;

const HEADER: &str = "FAKEWIM";
const SPLIT_COPY_LIMIT: u64 = 64 * MIB;

/// Test environment with a temporary work directory and fake tool store.
pub struct TestEnv {
    /// Temporary directory (kept alive for lifetime of TestEnv)
    pub _temp_dir: TempDir,
    pub root: PathBuf,
    pub config: Config,
    /// Backing store of [`FakeImageTool`].
    pub store: PathBuf,
}

impl TestEnv {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let root = temp_dir.path().to_path_buf();
        let store = root.join("image-store");
        fs::create_dir_all(&store).expect("Failed to create store dir");
        fs::create_dir_all(root.join("presets")).expect("Failed to create presets dir");

        let vars: HashMap<String, String> = [
            ("WINMEDIA_WORK_DIR", "work"),
            ("WINMEDIA_PRESETS_DIR", "presets"),
            ("WINMEDIA_DRIVERS_DIR", "drivers"),
            ("WINMEDIA_GRUB_FRAGMENT", "grub.d/42_winmedia"),
            ("WINMEDIA_ISO_DEST", "out/windows.iso"),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        let config = Config::from_vars(&root, &vars);

        Self {
            _temp_dir: temp_dir,
            root,
            config,
            store,
        }
    }

    pub fn image_tool(&self) -> FakeImageTool {
        FakeImageTool::new(&self.store)
    }

    pub fn tracker(&self, releaser: FakeReleaser) -> ResourceTracker {
        ResourceTracker::open(self.config.tracker_state(), Box::new(releaser))
            .expect("tracker should open")
    }

    pub fn write_preset(&self, name: &str, body: &str) {
        fs::write(self.config.presets_dir.join(format!("{}.preset", name)), body)
            .expect("Failed to write preset");
    }

    /// An extracted installer tree with a fake install image and boot.wim.
    pub fn create_source_tree(&self, tool: &FakeImageTool, install_name: &str, install_size: u64) -> PathBuf {
        let source = self.root.join("source");
        fs::create_dir_all(source.join("sources")).expect("Failed to create sources dir");
        fs::create_dir_all(source.join("efi/boot")).expect("Failed to create efi dir");
        fs::write(source.join("setup.exe"), b"MZ").expect("Failed to write setup.exe");
        fs::write(source.join("autorun.inf"), b"[autorun]").expect("Failed to write autorun.inf");
        fs::write(source.join("sources/ei.cfg"), b"[Channel]").expect("Failed to write ei.cfg");

        let install = source.join("sources").join(install_name);
        tool.create_image(&install, &["Windows 11 Home", "Windows 11 Pro"], install_size);
        for index in [1, 2] {
            create_windows_tree(&tool.index_dir(&install, index));
        }

        let boot = source.join("sources/boot.wim");
        tool.create_image(&boot, &["Microsoft Windows PE", "Microsoft Windows Setup"], 0);
        create_winpe_tree(&tool.index_dir(&boot, 2));
        source
    }
}

/// A small offline Windows tree.
pub fn create_windows_tree(root: &Path) {
    let files = [
        "Windows/System32/config/SYSTEM",
        "Windows/System32/notepad.exe",
        "Windows/SystemApps/Microsoft.XboxGameCallableUI_cw5n1h2txyewy/app.dll",
        "Program Files/WindowsApps/Microsoft.XboxApp_48.49/app.exe",
        "Program Files/WindowsApps/Microsoft.ZuneMusic_10.22/app.exe",
        "Program Files/WindowsApps/Microsoft.WindowsCalculator_11.2/app.exe",
        "Windows/System32/OneDriveSetup.exe",
    ];
    for file in files {
        let path = root.join(file);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, file.as_bytes()).unwrap();
    }
}

/// A WinPE tree with the stock startup script.
pub fn create_winpe_tree(root: &Path) {
    let script = root.join("Windows/System32/startnet.cmd");
    fs::create_dir_all(script.parent().unwrap()).unwrap();
    fs::write(&script, "wpeinit\r\n").unwrap();
    fs::create_dir_all(root.join("sources")).unwrap();
    fs::write(root.join("sources/setup.exe"), b"MZ").unwrap();
}

/// SHA-256 over every file path and content under `root`, in sorted order.
pub fn tree_digest(root: &Path) -> String {
    let mut hasher = Sha256::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.unwrap();
        let rel = entry.path().strip_prefix(root).unwrap();
        hasher.update(rel.to_string_lossy().as_bytes());
        if entry.file_type().is_file() {
            hasher.update(fs::read(entry.path()).unwrap());
        }
    }
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

pub fn assert_exists(path: &Path) {
    assert!(path.exists(), "expected {} to exist", path.display());
}

pub fn assert_missing(path: &Path) {
    assert!(!path.exists(), "expected {} to be gone", path.display());
}

#[derive(Default)]
struct ImageState {
    calls: Vec<String>,
    mounts: HashMap<PathBuf, (PathBuf, u32)>,
    fail_mount: bool,
    fail_commit: bool,
    fail_export: bool,
}

/// Directory-backed stand-in for wimlib-imagex.
#[derive(Clone)]
pub struct FakeImageTool {
    store: PathBuf,
    state: Rc<RefCell<ImageState>>,
}

impl FakeImageTool {
    pub fn new(store: &Path) -> Self {
        Self {
            store: store.to_path_buf(),
            state: Rc::new(RefCell::new(ImageState::default())),
        }
    }

    /// Write a fake container at `path`, padded (sparse) to `size` bytes.
    pub fn create_image(&self, path: &Path, names: &[&str], size: u64) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        let mut header = format!("{}\n", HEADER);
        for (i, name) in names.iter().enumerate() {
            header.push_str(&format!("{}\t{}\n", i + 1, name));
        }
        fs::write(path, header).unwrap();
        if size > 0 {
            fs::OpenOptions::new()
                .write(true)
                .open(path)
                .unwrap()
                .set_len(size)
                .unwrap();
        }
    }

    /// Content of `index` of the image called like `image`.
    pub fn index_dir(&self, image: &Path, index: u32) -> PathBuf {
        self.store
            .join(image.file_name().unwrap())
            .join(index.to_string())
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.borrow().calls.clone()
    }

    pub fn fail_mount(&self) {
        self.state.borrow_mut().fail_mount = true;
    }

    pub fn fail_commit(&self) {
        self.state.borrow_mut().fail_commit = true;
    }

    pub fn fail_export(&self) {
        self.state.borrow_mut().fail_export = true;
    }

    pub fn open_mounts(&self) -> usize {
        self.state.borrow().mounts.len()
    }

    fn record(&self, call: String) {
        self.state.borrow_mut().calls.push(call);
    }

    fn copy_store(&self, from: &Path, to: &Path) -> Result<()> {
        let src = self.store.join(from.file_name().context("no file name")?);
        let dest = self.store.join(to.file_name().context("no file name")?);
        if src.is_dir() {
            if dest.exists() {
                fs::remove_dir_all(&dest)?;
            }
            copy_dir_recursive(&src, &dest)?;
        }
        Ok(())
    }
}

fn read_header(path: &Path) -> Result<String> {
    let mut buf = Vec::new();
    fs::File::open(path)?.take(4096).read_to_end(&mut buf)?;
    let end = buf.iter().position(|b| *b == 0).unwrap_or(buf.len());
    Ok(String::from_utf8_lossy(&buf[..end]).into_owned())
}

fn name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

impl ImageTool for FakeImageTool {
    fn info(&self, image: &Path) -> Result<Vec<IndexInfo>> {
        let header = read_header(image)?;
        let mut lines = header.lines();
        if lines.next() != Some(HEADER) {
            bail!("{} is not an image", image.display());
        }
        Ok(lines
            .filter_map(|l| l.split_once('\t'))
            .filter_map(|(i, n)| {
                Some(IndexInfo {
                    index: i.parse().ok()?,
                    name: n.to_string(),
                    total_bytes: 0,
                })
            })
            .collect())
    }

    fn export_all(&self, src: &Path, dest: &Path) -> Result<()> {
        self.record(format!("export {} {}", name(src), name(dest)));
        if self.state.borrow().fail_export {
            fs::write(dest, b"partial")?;
            bail!("export: simulated failure");
        }
        fs::write(dest, read_header(src)?)?;
        self.copy_store(src, dest)
    }

    fn split(&self, image: &Path, first_part: &Path, part_size_mib: u64) -> Result<()> {
        self.record(format!("split {} {}", name(image), part_size_mib));
        let size = fs::metadata(image)?.len();
        let part_size = part_size_mib * MIB;
        let count = size.div_ceil(part_size);
        let stem = first_part
            .file_stem()
            .and_then(|s| s.to_str())
            .context("bad part name")?;
        // Small images are split byte for byte; large sparse ones only by size.
        let data = if size <= SPLIT_COPY_LIMIT {
            Some(fs::read(image)?)
        } else {
            None
        };
        for n in 1..=count {
            let part = if n == 1 {
                first_part.to_path_buf()
            } else {
                first_part.with_file_name(format!("{}{}.swm", stem, n))
            };
            let start = (n - 1) * part_size;
            let len = part_size.min(size - start);
            match &data {
                Some(bytes) => fs::write(&part, &bytes[start as usize..(start + len) as usize])?,
                None => {
                    if n == 1 {
                        fs::write(&part, read_header(image)?)?;
                    } else {
                        fs::write(&part, b"")?;
                    }
                    fs::OpenOptions::new().write(true).open(&part)?.set_len(len)?;
                }
            }
        }
        self.copy_store(image, first_part)
    }

    fn mount_rw(&self, image: &Path, index: u32, mount_point: &Path) -> Result<()> {
        self.record(format!("mount {} {}", name(image), index));
        if self.state.borrow().fail_mount {
            bail!("mount: simulated failure");
        }
        let content = self.index_dir(image, index);
        fs::create_dir_all(&content)?;
        copy_dir_recursive(&content, mount_point)?;
        self.state
            .borrow_mut()
            .mounts
            .insert(mount_point.to_path_buf(), (image.to_path_buf(), index));
        Ok(())
    }

    fn unmount(&self, mount_point: &Path, commit: bool) -> Result<()> {
        self.record(format!("unmount {}", if commit { "commit" } else { "discard" }));
        if commit && self.state.borrow().fail_commit {
            bail!("unmount --commit: simulated failure");
        }
        let Some((image, index)) = self.state.borrow_mut().mounts.remove(mount_point) else {
            bail!("{} is not mounted", mount_point.display());
        };
        if commit {
            let content = self.index_dir(&image, index);
            fs::remove_dir_all(&content)?;
            copy_dir_recursive(mount_point, &content)?;
        }
        fs::remove_dir_all(mount_point)?;
        fs::create_dir_all(mount_point)?;
        Ok(())
    }
}

/// Archive stand-in: an "archive" lists one relative path per line, and
/// extracting it creates those files.
#[derive(Clone, Default)]
pub struct FakeExtractor {
    calls: Rc<RefCell<Vec<(String, PathBuf)>>>,
    broken_tools: Rc<RefCell<Vec<String>>>,
}

impl FakeExtractor {
    pub fn calls(&self) -> Vec<(String, PathBuf)> {
        self.calls.borrow().clone()
    }

    pub fn break_tool(&self, tool: &str) {
        self.broken_tools.borrow_mut().push(tool.to_string());
    }
}

pub fn write_archive(path: &Path, entries: &[&str]) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, entries.join("\n")).unwrap();
}

impl ArchiveExtractor for FakeExtractor {
    fn extract(&self, tool: &str, archive: &Path, dest: &Path) -> Result<()> {
        self.calls
            .borrow_mut()
            .push((tool.to_string(), archive.to_path_buf()));
        if self.broken_tools.borrow().iter().any(|t| t == tool) {
            bail!("{}: simulated failure", tool);
        }
        for entry in fs::read_to_string(archive)?.lines().filter(|l| !l.is_empty()) {
            let path = dest.join(entry);
            fs::create_dir_all(path.parent().context("no parent")?)?;
            fs::write(&path, entry)?;
        }
        Ok(())
    }
}

/// Disk stand-in. `mount` binds the mount point to a directory standing in
/// for the partition; `unmount` moves what was written there into it.
#[derive(Clone)]
pub struct FakeDisk {
    pub lsblk: String,
    pub device_root: PathBuf,
    calls: Rc<RefCell<Vec<String>>>,
    mounted: Rc<RefCell<Vec<PathBuf>>>,
}

impl FakeDisk {
    pub fn new(lsblk: &str, device_root: &Path) -> Self {
        Self {
            lsblk: lsblk.to_string(),
            device_root: device_root.to_path_buf(),
            calls: Rc::default(),
            mounted: Rc::default(),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    fn record(&self, call: String) {
        self.calls.borrow_mut().push(call);
    }
}

/// A system NVMe disk and a 32 GB removable stick.
pub const LSBLK_JSON: &str = r#"{"blockdevices":[
  {"name":"nvme0n1","path":"/dev/nvme0n1","type":"disk","rm":false,"size":512110190592,"label":null,"model":"Samsung SSD","mountpoint":null,
   "children":[{"name":"nvme0n1p2","path":"/dev/nvme0n1p2","type":"part","rm":false,"size":511480000000,"label":null,"model":null,"mountpoint":"/"}]},
  {"name":"sdb","path":"/dev/sdb","type":"disk","rm":true,"size":32000000000,"label":null,"model":"Cruzer","mountpoint":null}
]}"#;

impl DiskTool for FakeDisk {
    fn list_block_devices(&self) -> Result<String> {
        Ok(self.lsblk.clone())
    }

    fn root_source(&self) -> Result<Option<String>> {
        Ok(Some("/dev/nvme0n1p2".to_string()))
    }

    fn mount_points(&self, device: &Path) -> Result<Vec<PathBuf>> {
        self.record(format!("mount_points {}", device.display()));
        Ok(Vec::new())
    }

    fn unmount(&self, mount_point: &Path) -> Result<()> {
        self.record(format!("unmount {}", mount_point.display()));
        let mut mounted = self.mounted.borrow_mut();
        if let Some(pos) = mounted.iter().position(|m| m == mount_point) {
            mounted.remove(pos);
            if self.device_root.exists() {
                fs::remove_dir_all(&self.device_root)?;
            }
            fs::rename(mount_point, &self.device_root)?;
            fs::create_dir_all(mount_point)?;
        }
        Ok(())
    }

    fn partition(&self, target: &ConfirmedTarget) -> Result<()> {
        self.record(format!("partition {}", target.target().path.display()));
        Ok(())
    }

    fn format_fat32(&self, _target: &ConfirmedTarget, partition: &Path, label: &str) -> Result<()> {
        self.record(format!("format {} {}", partition.display(), label));
        Ok(())
    }

    fn mount(&self, partition: &Path, mount_point: &Path) -> Result<()> {
        self.record(format!("mount {}", partition.display()));
        self.mounted.borrow_mut().push(mount_point.to_path_buf());
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        self.record("sync".to_string());
        Ok(())
    }
}

/// Records releases; optionally refuses paths containing `stuck`.
#[derive(Clone, Default)]
pub struct FakeReleaser {
    pub released: Rc<RefCell<Vec<PathBuf>>>,
    pub stuck: Option<String>,
}

impl FakeReleaser {
    pub fn released(&self) -> Vec<PathBuf> {
        self.released.borrow().clone()
    }

    fn release(&self, mount_point: &Path) -> Result<()> {
        if let Some(stuck) = &self.stuck {
            if mount_point.to_string_lossy().contains(stuck.as_str()) {
                bail!("target is busy");
            }
        }
        self.released.borrow_mut().push(mount_point.to_path_buf());
        Ok(())
    }
}

impl MountReleaser for FakeReleaser {
    fn release_image_mount(&self, mount_point: &Path) -> Result<()> {
        self.release(mount_point)
    }

    fn release_device_mount(&self, mount_point: &Path) -> Result<()> {
        self.release(mount_point)
    }
}
