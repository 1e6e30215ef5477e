use std::path::Path;
use std::time::Duration;

use secrecy::SecretString;
use tokio::select;
use tracing::{debug, error, info, warn};

use tg_bot::{Bot, BotError};
use tgfs::fs::{ChannelFs, FsOptions};
use tgfs::remote::{RemoteError, RemoteStore as _};

use crate::app_config;
use crate::telegram::{TelegramError, TelegramStore};

/// Reasons the daemon cannot start or stops abnormally.
#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    #[error("could not build the async runtime: {0}")]
    Runtime(#[source] std::io::Error),

    #[error("could not create the Telegram client: {0}")]
    Client(#[from] BotError),

    #[error("channel check failed: {0}")]
    Channel(#[from] TelegramError),

    #[error("initial listing of the channel failed: {0}")]
    InitialListing(#[from] RemoteError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("configuration is missing `{0}`")]
    Missing(&'static str),
}

mod managed_fuse {
    //! fuser only does a regular unmount when the `BackgroundSession` is dropped. We want to be
    //! aggressive and lazily detach the mount if that did not work, so the mount point is never left
    //! dangling.
    use std::path::PathBuf;
    use std::time::Duration;

    use fuser::BackgroundSession;
    use nix::errno::Errno;

    use super::{app_config, debug, error};
    use crate::telegram::TelegramStore;
    use tgfs::fs::{ChannelFs, Reconciler, fuser::FuserAdapter};

    pub struct FuseCoreScope {
        _session: BackgroundSession,
    }

    impl FuseCoreScope {
        fn spawn(
            config: &app_config::Config,
            fs: ChannelFs<TelegramStore>,
            reconciler: Reconciler,
            handle: tokio::runtime::Handle,
        ) -> Result<Self, std::io::Error> {
            let read_only = fs.options().read_only;
            let adapter = FuserAdapter::new(fs, Some(reconciler), handle);
            let mut mount_opts = vec![
                fuser::MountOption::FSName("tgfs".to_owned()),
                fuser::MountOption::Subtype("tgfs".to_owned()),
                fuser::MountOption::NoDev,
                fuser::MountOption::NoSuid,
                fuser::MountOption::DefaultPermissions,
            ];
            mount_opts.push(if read_only {
                fuser::MountOption::RO
            } else {
                fuser::MountOption::RW
            });
            if config.allow_other {
                mount_opts.push(fuser::MountOption::AllowOther);
                mount_opts.push(fuser::MountOption::AutoUnmount);
            }

            Ok(Self {
                _session: fuser::spawn_mount2(adapter, &config.mount_point, &mount_opts)?,
            })
        }
    }

    pub struct ManagedFuse {
        mount_point: PathBuf,
    }

    impl ManagedFuse {
        pub fn new(config: &app_config::Config) -> Self {
            Self {
                mount_point: config.mount_point.clone(),
            }
        }

        pub fn spawn(
            &self,
            config: &app_config::Config,
            fs: ChannelFs<TelegramStore>,
            reconciler: Reconciler,
            handle: tokio::runtime::Handle,
        ) -> Result<FuseCoreScope, std::io::Error> {
            _ = self; // self used for calling convention.
            FuseCoreScope::spawn(config, fs, reconciler, handle)
        }
    }

    impl Drop for ManagedFuse {
        fn drop(&mut self) {
            const ATTEMPTS: u32 = 10;
            const BACKOFF: Duration = Duration::from_millis(10);

            let mount_point = &self.mount_point;
            for attempt in 1..=ATTEMPTS {
                match nix::mount::umount2(mount_point, nix::mount::MntFlags::MNT_DETACH) {
                    Ok(()) => {
                        debug!(?mount_point, attempt, "detached mount");
                        return;
                    }
                    // Not mounted anymore: the session already cleaned up after itself.
                    Err(Errno::EINVAL | Errno::ENOENT) => return,
                    Err(Errno::EBUSY) if attempt < ATTEMPTS => {
                        debug!(?mount_point, attempt, "mount busy, retrying detach");
                        std::thread::sleep(BACKOFF);
                    }
                    Err(e) => {
                        error!(?mount_point, attempt, error = %e, "could not detach mount");
                        return;
                    }
                }
            }
        }
    }
}

/// Make sure `mount_point` is an empty directory, creating it if it does not exist.
async fn prepare_mount_point(mount_point: &Path) -> Result<(), std::io::Error> {
    let mut entries = match tokio::fs::read_dir(mount_point).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tokio::fs::create_dir_all(mount_point).await?;
            info!(path = %mount_point.display(), "created mount point");
            return Ok(());
        }
        Err(e) => return Err(e),
    };
    if entries.next_entry().await?.is_some() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            format!("mount point {} is not empty", mount_point.display()),
        ));
    }
    Ok(())
}

/// Resolve on the first of SIGINT, SIGTERM or SIGHUP.
async fn wait_for_exit() -> Result<(), std::io::Error> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let mut hangup = signal(SignalKind::hangup())?;
    let received = select! {
        _ = interrupt.recv() => "SIGINT",
        _ = terminate.recv() => "SIGTERM",
        _ = hangup.recv() => "SIGHUP",
    };
    info!(signal = received, "shutting down");
    Ok(())
}

/// Connect to the channel and build a populated filesystem over it.
async fn connect(
    config: &app_config::Config,
    token: SecretString,
    chat_id: i64,
) -> Result<ChannelFs<TelegramStore>, DaemonError> {
    let store = TelegramStore::new(Bot::new(token)?, chat_id);
    store.verify_channel().await?;

    let read_only = !store.check_write_access().await;
    if read_only {
        warn!(chat_id, "bot cannot post to the channel, mounting read-only");
    }

    let fs = ChannelFs::new(
        store,
        FsOptions {
            read_only,
            cache_enabled: config.cache,
            upload_delay: Duration::from_secs(config.upload_delay_secs),
            uid: config.uid,
            gid: config.gid,
        },
    );
    let report = fs.reconcile().await?;
    info!(files = report.added, read_only, "channel loaded");
    Ok(fs)
}

/// Main entry point for the daemon.
pub async fn run(
    config: app_config::Config,
    handle: tokio::runtime::Handle,
) -> Result<(), DaemonError> {
    let token = config
        .bot_token
        .clone()
        .ok_or(DaemonError::Missing("bot-token"))?;
    let chat_id = config.chat_id.ok_or(DaemonError::Missing("chat-id"))?;

    let fs = connect(&config, token, chat_id).await?;
    prepare_mount_point(&config.mount_point).await?;

    info!("Mounting filesystem at {}.", config.mount_point.display());

    let reconciler = fs.spawn_reconciler(Duration::from_secs(config.sync_interval_secs));
    let fuse = managed_fuse::ManagedFuse::new(&config);
    {
        let _session = fuse.spawn(&config, fs.clone(), reconciler, handle)?;
        info!("tgfs is running. Press Ctrl+C to stop.");

        wait_for_exit().await?;
    }
    drop(fuse);

    // Files still waiting out their upload delay would otherwise be lost.
    fs.flush_pending().await;
    Ok(())
}

pub fn spawn(config: app_config::Config) -> Result<(), DaemonError> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(DaemonError::Runtime)?;
    runtime.block_on(run(config, runtime.handle().clone()))
}
