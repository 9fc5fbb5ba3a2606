//! Process spawning and shutdown helpers shared by launchers.

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Apply the Windows `CREATE_NO_WINDOW` flag to child processes.
///
/// On non-Windows targets this is a no-op.
pub trait NoWindowExt {
    fn no_window(&mut self);
}

#[cfg(feature = "tokio")]
pub use self::async_child::{ChildStop, stop_child, tokio_command};

#[cfg(feature = "tokio")]
mod async_child {
    use std::ffi::OsStr;
    use std::io;
    use std::process::ExitStatus;
    use std::time::Duration;

    use tokio::io::AsyncWriteExt;
    use tokio::process::Child;

    use super::NoWindowExt;

    impl NoWindowExt for tokio::process::Command {
        fn no_window(&mut self) {
            #[cfg(windows)]
            {
                use std::os::windows::process::CommandExt;
                self.as_std_mut().creation_flags(super::CREATE_NO_WINDOW);
            }
        }
    }

    /// Create a `tokio::process::Command` with `CREATE_NO_WINDOW` applied on Windows.
    ///
    /// The child is killed if its `Child` handle is dropped, so a crashed
    /// supervisor task never leaks a running process.
    pub fn tokio_command(program: impl AsRef<OsStr>) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(program);
        cmd.no_window();
        cmd.kill_on_drop(true);
        cmd
    }

    /// How a child ended after [`stop_child`] was asked to stop it.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum ChildStop {
        /// The child exited on its own within the grace period.
        Exited(ExitStatus),
        /// The grace period elapsed and the child was killed.
        Killed,
    }

    impl ChildStop {
        /// Whether the child had to be killed.
        pub fn was_forced(&self) -> bool {
            matches!(self, ChildStop::Killed)
        }
    }

    /// Ask a child to stop, killing it if it does not exit within `grace`.
    ///
    /// When `quit_input` is given it is written to the child's stdin first
    /// (ffmpeg finishes its outputs cleanly on `q`). Stdin is closed either way.
    pub async fn stop_child(
        child: &mut Child,
        quit_input: Option<&[u8]>,
        grace: Duration,
    ) -> io::Result<ChildStop> {
        if let Some(mut stdin) = child.stdin.take() {
            if let Some(input) = quit_input {
                // The child may already have closed its end.
                let _ = stdin.write_all(input).await;
                let _ = stdin.flush().await;
            }
            drop(stdin);
        }

        match tokio::time::timeout(grace, child.wait()).await {
            Ok(status) => Ok(ChildStop::Exited(status?)),
            Err(_) => {
                child.kill().await?;
                Ok(ChildStop::Killed)
            }
        }
    }

}
