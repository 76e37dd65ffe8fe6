//! Site adapter seam

use async_trait::async_trait;

use crate::execution::PluginExecution;
use crate::signal::Outcome;

/// A hoster plugin: the site-specific part of a download
///
/// Accounts and OCR engines are looked up by the task's
/// [`plugin`](crate::Task::plugin) name.
///
/// The engine calls [`init`](Self::init) once per execution, then
/// [`setup`](Self::setup) and [`process`](Self::process) for every try. `process`
/// usually loads pages, waits, solves captchas and finally calls
/// [`PluginExecution::download`]; any step may end the try by returning a
/// [`Signal`](crate::Signal).
#[async_trait]
pub trait Hoster: Send {
    /// One-time initialisation (chunk limit, resume support, ...)
    async fn init(&mut self, _exec: &mut PluginExecution) -> Outcome<()> {
        Ok(())
    }

    /// Called before every try of [`process`](Self::process)
    async fn setup(&mut self, _exec: &mut PluginExecution) -> Outcome<()> {
        Ok(())
    }

    /// Obtain the file
    async fn process(&mut self, exec: &mut PluginExecution) -> Outcome<()>;
}
