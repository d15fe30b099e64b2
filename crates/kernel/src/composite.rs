use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::{command::SubmitCode, Kernel, KernelContext, KernelError};

/// Routes each submission to a named child kernel.
///
/// The command's target kernel name must match a child exactly. Commands
/// without a target go to the default child: the one named by
/// [`CompositeKernel::with_default`], or else the first one added.
pub struct CompositeKernel {
    name: String,
    children: Vec<Arc<dyn Kernel>>,
    default_kernel_name: Option<String>,
}

impl CompositeKernel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            children: Vec::new(),
            default_kernel_name: None,
        }
    }

    pub fn add(mut self, kernel: Arc<dyn Kernel>) -> Self {
        self.children.push(kernel);
        self
    }

    pub fn with_default(mut self, name: impl Into<String>) -> Self {
        self.default_kernel_name = Some(name.into());
        self
    }

    pub fn child_names(&self) -> impl Iterator<Item = &str> {
        self.children.iter().map(|child| child.name())
    }

    pub fn route(&self, target: Option<&str>) -> Result<&Arc<dyn Kernel>, KernelError> {
        match target.or(self.default_kernel_name.as_deref()) {
            Some(name) => self
                .children
                .iter()
                .find(|child| child.name() == name)
                .ok_or_else(|| KernelError::KernelNotFound(name.to_string())),
            None => self
                .children
                .first()
                .ok_or_else(|| KernelError::KernelNotFound(format!("{} has no kernels", self.name))),
        }
    }
}

#[async_trait]
impl Kernel for CompositeKernel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn submit_code(
        &self,
        submission: &SubmitCode,
        context: &mut KernelContext,
    ) -> Result<(), KernelError> {
        let child = self.route(context.command().target_kernel_name())?;
        debug!(
            command_id = %context.command().id(),
            kernel = child.name(),
            "routing submission"
        );

        child.submit_code(submission, context).await
    }
}
