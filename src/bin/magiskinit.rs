//! Boot-image init replacement
//!
//! Decides from the argument vector whether this invocation is the policy
//! applet, a payload extraction, or an actual boot, and runs it.

use std::env;
use std::ffi::OsString;

use anyhow::Result;

use magiskinit::applet::{self, Invocation};
use magiskinit::boot::{BootContext, ExecHandoff};
use magiskinit::config::BootPaths;
use magiskinit::mount::SysMounter;
use magiskinit::sepolicy::HostToolkit;

fn main() -> Result<()> {
    // Every mode passed to mknod/open from here on applies literally
    unsafe { libc::umask(0) };

    #[cfg(feature = "verbose")]
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::DEBUG.into()),
        )
        .init();

    let argv: Vec<OsString> = env::args_os().collect();
    match Invocation::from_argv(&argv) {
        Invocation::Policy => {
            let toolkit = HostToolkit::default();
            applet::policy_main(&BootPaths::default(), &toolkit, &argv[1..])?;
        }
        Invocation::Extract(kind, target) => {
            applet::extract_payload(kind, &target)?;
        }
        Invocation::Boot => {
            let mounter = SysMounter;
            let toolkit = HostToolkit::default();
            let handoff = ExecHandoff;
            let mut ctx = BootContext::new(BootPaths::default(), &mounter, &toolkit, &handoff);
            ctx.run(&argv)?;
        }
    }
    Ok(())
}
