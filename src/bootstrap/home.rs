use crate::config::BootstrapConfig;
use crate::error::{BootstrapError, Result};
use crate::fs::Filesystem;
use crate::report::{Step, StepLog, StepOutcome};
use tracing::{debug, info};

/// Fill the gaps in the home directory. Existing files are never touched.
///
/// Only a missing home directory is fatal; copy and write failures are
/// recorded in the outcome.
pub fn initialize(
    fs: &dyn Filesystem,
    config: &BootstrapConfig,
    fast_path: bool,
) -> Result<StepOutcome> {
    let home = &config.home_dir;
    if !fs.is_dir(home) {
        return Err(BootstrapError::MissingDirectory(home.clone()));
    }

    let profile = config.profile_path();
    if fast_path && fs.exists(&profile) {
        info!(
            "Home directory {} already initialized for this identity, skipping",
            home.display()
        );
        return Ok(StepOutcome::skipped(
            "marker matches and shell profile present",
        ));
    }

    let mut log = StepLog::new(Step::HomeDirectory);

    if fs.exists(&profile) {
        debug!("{} present, not seeding from skeleton", profile.display());
    } else {
        seed_from_skeleton(fs, config, &mut log);
        if !fs.exists(&profile) {
            match fs.write(&profile, &default_profile(config)) {
                Ok(()) => log.action(format!("synthesized default {}", config.profile_file)),
                Err(e) => log.failure(format!("could not write {}: {}", profile.display(), e)),
            }
        }
    }

    let session = home.join(&config.session_file);
    let skel_session = config.skel_dir.join(&config.session_file);
    if !fs.exists(&session) && fs.exists(&skel_session) {
        match fs.copy_file(&skel_session, &session) {
            Ok(()) => log.action(format!("restored {} from skeleton", config.session_file)),
            Err(e) => log.failure(format!("could not copy {}: {}", config.session_file, e)),
        }
    }

    let login_profile = config.login_profile_path();
    if !fs.exists(&login_profile) {
        match fs.write(&login_profile, &default_login_profile(config)) {
            Ok(()) => log.action(format!(
                "synthesized default {}",
                config.login_profile_file
            )),
            Err(e) => log.failure(format!(
                "could not write {}: {}",
                login_profile.display(),
                e
            )),
        }
    }

    Ok(log.finish("home directory already complete"))
}

fn seed_from_skeleton(fs: &dyn Filesystem, config: &BootstrapConfig, log: &mut StepLog) {
    let skel = &config.skel_dir;
    if !fs.is_dir(skel) {
        info!("Skeleton {} missing, using built-in defaults", skel.display());
        return;
    }
    match fs.is_empty_dir(skel) {
        Ok(true) => {
            info!("Skeleton {} is empty, using built-in defaults", skel.display());
            return;
        }
        Ok(false) => {}
        Err(e) => {
            log.failure(format!("could not read skeleton {}: {}", skel.display(), e));
            return;
        }
    }

    match fs.copy_tree_missing(skel, &config.home_dir) {
        Ok(count) => log.action(format!(
            "copied {} entries from {} into {}",
            count,
            skel.display(),
            config.home_dir.display()
        )),
        Err(e) => log.failure(format!("skeleton copy from {} failed: {}", skel.display(), e)),
    }
}

fn default_profile(config: &BootstrapConfig) -> String {
    let prefix = config.package_prefix.display();
    format!(
        r#"# ~/{profile}: written by toadbox-init, no skeleton profile was available

export PATH="$HOME/.local/bin:{prefix}/bin:{prefix}/sbin:$PATH"

# Nothing else to do for non-interactive shells
case $- in
    *i*) ;;
      *) return;;
esac

HISTCONTROL=ignoreboth
HISTSIZE=10000
shopt -s histappend checkwinsize

alias ls='ls --color=auto'
alias ll='ls -alF'
alias la='ls -A'
alias l='ls -CF'
alias grep='grep --color=auto'

PS1='\[\e[1;32m\]\u@\h\[\e[0m\]:\[\e[1;34m\]\w\[\e[0m\]\$ '
"#,
        profile = config.profile_file,
        prefix = prefix,
    )
}

fn default_login_profile(config: &BootstrapConfig) -> String {
    let prefix = config.package_prefix.display();
    format!(
        r#"# ~/{login}: written by toadbox-init

if [ -n "$BASH_VERSION" ] && [ -f "$HOME/{profile}" ]; then
    . "$HOME/{profile}"
fi

if [ -d "$HOME/.local/bin" ]; then
    PATH="$HOME/.local/bin:$PATH"
fi

if [ -d "{prefix}/bin" ]; then
    PATH="{prefix}/bin:{prefix}/sbin:$PATH"
fi

export PATH
"#,
        login = config.login_profile_file,
        profile = config.profile_file,
        prefix = prefix,
    )
}
