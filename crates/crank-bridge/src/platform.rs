use std::cell::RefCell;
use std::rc::Rc;

use log::debug;

use crate::host::Host;

// In-process object space, used for native runs and tests
pub mod memory;

// js-sys backed host (feature-gated, wasm32 only)
#[cfg(all(feature = "browser", target_arch = "wasm32"))]
pub mod browser;

thread_local! {
    static INSTALLED_HOST: RefCell<Option<Rc<dyn Host>>> = const { RefCell::new(None) };
}

/// Make `host` the evaluation capability used by [`crate::Bridge::current`]
/// on this thread. Replaces any previously installed host.
pub fn install_host(host: Rc<dyn Host>) {
    INSTALLED_HOST.with(|cell| {
        if cell.borrow_mut().replace(host).is_some() {
            debug!("[BRIDGE] replaced the installed host");
        }
    });
}

pub fn uninstall_host() -> Option<Rc<dyn Host>> {
    INSTALLED_HOST.with(|cell| cell.borrow_mut().take())
}

pub fn current_host() -> Option<Rc<dyn Host>> {
    INSTALLED_HOST.with(|cell| cell.borrow().clone())
}
