//! Module for devices programmed in-system by an external programmer.
//!
//! It takes no part in update mode: the first idle callback resumes the application.

use crate::{
    module::{Action, Module},
    trampoline::{ModuleInfo, ModuleKind},
};

#[derive(Default)]
pub struct IspModule;

impl IspModule {
    pub const fn new() -> Self {
        Self
    }
}

impl Module for IspModule {
    fn info(&self) -> ModuleInfo {
        ModuleInfo::new(ModuleKind::Isp, 0, 0)
    }

    fn init(&mut self) {}

    fn exit(&mut self) {}

    fn on_idle(&mut self) -> Action {
        Action::RunApplication
    }

    fn on_periodic(&mut self) -> Action {
        Action::Continue
    }
}
