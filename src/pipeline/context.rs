use std::cell::{Cell, RefCell};

use url::Url;

use crate::protocol::Switches;

/// Mutable state shared by the filters of one document pass.
#[derive(Debug)]
pub struct PageContext {
    page_url: Url,
    base: RefCell<Url>,
    base_locked: Cell<bool>,
    scripts: RefCell<Vec<String>>,
    switches: Switches,
}

impl PageContext {
    pub fn new(page_url: Url, switches: Switches) -> Self {
        Self {
            base: RefCell::new(page_url.clone()),
            page_url,
            base_locked: Cell::new(false),
            scripts: RefCell::new(Vec::new()),
            switches,
        }
    }

    pub fn page_url(&self) -> &Url {
        &self.page_url
    }

    /// URL relative references resolve against.
    pub fn base(&self) -> Url {
        self.base.borrow().clone()
    }

    /// Only the first `<base>` of a document counts.
    pub fn set_base(&self, base: Url) {
        if !self.base_locked.replace(true) {
            *self.base.borrow_mut() = base;
        }
    }

    pub fn switches(&self) -> &Switches {
        &self.switches
    }

    /// Queue a script to be emitted once at the end of the document.
    pub fn push_script(&self, script: impl Into<String>) {
        self.scripts.borrow_mut().push(script.into());
    }

    pub fn take_scripts(&self) -> Vec<String> {
        std::mem::take(&mut *self.scripts.borrow_mut())
    }
}
