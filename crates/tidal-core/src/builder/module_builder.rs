use super::ProcessBuilder;
use crate::module::Module;
use crate::signal::{SignalId, SignalKind};
use crate::types::Type;

pub struct ModuleBuilder {
    module: Module,
}

impl ModuleBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            module: Module::new(name),
        }
    }

    pub fn signal(&mut self, name: &str, ty: Type, kind: SignalKind) -> SignalId {
        self.module.add_signal(name, ty, kind)
    }

    pub fn process(&mut self, name: &str) -> ProcessBuilder<'_> {
        let process = self.module.new_process(name);
        ProcessBuilder::new(&mut self.module, process)
    }

    pub fn module(&self) -> &Module {
        &self.module
    }

    pub fn module_mut(&mut self) -> &mut Module {
        &mut self.module
    }

    pub fn build(self) -> Module {
        self.module
    }
}
