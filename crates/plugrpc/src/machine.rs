//! A local directory standing in for a provisioned machine.

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Component, Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::{Mutex, PoisonError};

use plugrpc_plugin::{CommandOutcome, Communicator, PluginError, RemoteCommand, Result};
use tracing::debug;

/// Treats a local directory as the remote machine.
///
/// Commands run through `sh -c` inside the directory; file paths are taken
/// relative to it and may not climb out of it.
pub struct LocalCommunicator {
    root: PathBuf,
    commands: Mutex<Vec<(String, i32)>>,
    uploaded: Mutex<Vec<String>>,
}

impl LocalCommunicator {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            commands: Mutex::new(Vec::new()),
            uploaded: Mutex::new(Vec::new()),
        }
    }

    /// Commands run so far with their exit status.
    pub fn commands(&self) -> Vec<(String, i32)> {
        self.commands.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn uploaded(&self) -> Vec<String> {
        self.uploaded.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path.trim_start_matches('/'));
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(PluginError::failed(format!("path escapes the work directory: {path}")));
        }
        Ok(self.root.join(relative))
    }
}

impl Communicator for LocalCommunicator {
    fn start(&self, command: &RemoteCommand) -> Result<CommandOutcome> {
        debug!(command = %command.command, root = ?self.root, "running command");
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&command.command)
            .current_dir(&self.root)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;
        // Feed stdin while the output is drained, or a command that fills
        // its output pipe before reading all input never finishes.
        let stdin = child.stdin.take();
        let (output, fed) = std::thread::scope(|scope| {
            let feeding = scope.spawn(move || match stdin {
                Some(mut stdin) => stdin.write_all(&command.stdin),
                None => Ok(()),
            });
            let output = child.wait_with_output();
            (output, feeding.join())
        });
        let output = output?;
        match fed {
            Ok(Ok(())) => {}
            Ok(Err(err)) if err.kind() == io::ErrorKind::BrokenPipe => {
                debug!(command = %command.command, "command did not read all of stdin");
            }
            Ok(Err(err)) => return Err(err.into()),
            Err(_) => return Err(PluginError::failed("stdin writer panicked")),
        }
        let exit_status = output.status.code().unwrap_or(-1);
        debug!(command = %command.command, exit_status, "command finished");

        self.commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((command.command.clone(), exit_status));
        Ok(CommandOutcome {
            exit_status,
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }

    fn upload(&self, dst: &str, src: &mut dyn Read) -> Result<()> {
        let path = self.resolve(dst)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let bytes = io::copy(src, &mut File::create(&path)?)?;
        debug!(?path, bytes, "file uploaded");
        self.uploaded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(dst.to_string());
        Ok(())
    }

    fn upload_dir(&self, dst: &str, src: &str, exclude: &[String]) -> Result<()> {
        copy_tree(Path::new(src), &self.resolve(dst)?, exclude)
    }

    fn download(&self, src: &str, dst: &mut dyn Write) -> Result<()> {
        let path = self.resolve(src)?;
        io::copy(&mut File::open(&path)?, dst)?;
        Ok(())
    }

    fn download_dir(&self, src: &str, dst: &str, exclude: &[String]) -> Result<()> {
        copy_tree(&self.resolve(src)?, Path::new(dst), exclude)
    }
}

/// Every file under `root`, as sorted paths relative to it.
pub fn list_files(root: &Path) -> Result<Vec<String>> {
    fn walk(root: &Path, dir: &Path, out: &mut Vec<String>) -> io::Result<()> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if entry.file_type()?.is_dir() {
                walk(root, &path, out)?;
            } else if let Ok(relative) = path.strip_prefix(root) {
                out.push(relative.to_string_lossy().into_owned());
            }
        }
        Ok(())
    }

    let mut files = Vec::new();
    walk(root, root, &mut files)?;
    files.sort();
    Ok(files)
}

fn copy_tree(src: &Path, dst: &Path, exclude: &[String]) -> Result<()> {
    fs::create_dir_all(dst)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let name = entry.file_name();
        if exclude.iter().any(|skip| name.to_string_lossy() == skip.as_str()) {
            continue;
        }
        let target = dst.join(&name);
        if entry.file_type()?.is_dir() {
            copy_tree(&entry.path(), &target, exclude)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("plugrpc-machine-{tag}-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn runs_commands_in_the_work_directory() {
        let dir = scratch("start");
        let comm = LocalCommunicator::new(&dir);
        fs::write(dir.join("marker"), "x").unwrap();

        let mut command = RemoteCommand::new("ls; cat");
        command.stdin = b"from stdin".to_vec();
        let outcome = comm.start(&command).unwrap();
        let stdout = String::from_utf8(outcome.stdout).unwrap();
        assert!(outcome.exit_status == 0);
        assert!(stdout.contains("marker"));
        assert!(stdout.ends_with("from stdin"));

        let failed = comm.start(&RemoteCommand::new("exit 3")).unwrap();
        assert_eq!(failed.exit_status, 3);
        assert_eq!(comm.commands().len(), 2);
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn large_stdin_and_output_flow_together() {
        let dir = scratch("pipes");
        let comm = LocalCommunicator::new(&dir);

        let mut command = RemoteCommand::new("cat");
        command.stdin = vec![b'x'; 1 << 20];
        let outcome = comm.start(&command).unwrap();
        assert_eq!(outcome.exit_status, 0);
        assert_eq!(outcome.stdout.len(), 1 << 20);

        let mut ignored = RemoteCommand::new("true");
        ignored.stdin = vec![b'y'; 1 << 20];
        assert!(comm.start(&ignored).unwrap().success());
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn upload_and_download_stay_inside_root() {
        let dir = scratch("files");
        let comm = LocalCommunicator::new(&dir);

        comm.upload("/etc/app.conf", &mut &b"port=1"[..]).unwrap();
        assert_eq!(fs::read(dir.join("etc/app.conf")).unwrap(), b"port=1");
        assert_eq!(comm.uploaded(), vec!["/etc/app.conf".to_string()]);

        let mut back = Vec::new();
        comm.download("etc/app.conf", &mut back).unwrap();
        assert_eq!(back, b"port=1");

        let err = comm.upload("../outside", &mut &b""[..]).unwrap_err();
        assert!(err.to_string().contains("escapes"));
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn directory_copies_honour_excludes() {
        let dir = scratch("tree");
        let src = dir.join("src");
        fs::create_dir_all(src.join("nested")).unwrap();
        fs::write(src.join("keep.txt"), "k").unwrap();
        fs::write(src.join("skip.tmp"), "s").unwrap();
        fs::write(src.join("nested/inner.txt"), "i").unwrap();

        let comm = LocalCommunicator::new(dir.join("machine"));
        comm.upload_dir("/srv", src.to_str().unwrap(), &["skip.tmp".to_string()])
            .unwrap();
        assert!(dir.join("machine/srv/keep.txt").exists());
        assert!(dir.join("machine/srv/nested/inner.txt").exists());
        assert!(!dir.join("machine/srv/skip.tmp").exists());

        let out = dir.join("out");
        comm.download_dir("srv", out.to_str().unwrap(), &[]).unwrap();
        assert_eq!(fs::read_to_string(out.join("nested/inner.txt")).unwrap(), "i");
        assert_eq!(list_files(&out).unwrap(), vec!["keep.txt", "nested/inner.txt"]);
        let _ = fs::remove_dir_all(&dir);
    }
}
