//! Cross-linking the directive with the runnable set
//!
//! Every declared function must be provided by a runnable. Runnables that the
//! directive does not mention are either appended (the default) or rejected,
//! depending on the policy. The result is deterministic: existing functions
//! keep their order and appended ones follow in runnable-set order.

use bundle_directive::{Directive, Function};

use crate::error::PackageError;
use crate::runnable::RunnableSet;

/// How runnables missing from the directive are handled
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AugmentPolicy {
    /// Add a function for every undeclared runnable
    #[default]
    AppendUndeclared,
    /// Fail when a runnable is not declared
    RequireDeclared,
}

/// Return `directive` with its functions reconciled against `runnables`
pub fn augment(
    directive: Directive,
    runnables: &RunnableSet,
    policy: AugmentPolicy,
) -> Result<Directive, PackageError> {
    let mut functions = Vec::with_capacity(directive.functions.len().max(runnables.len()));

    for function in directive.functions {
        let Some(runnable) = runnables.get(&function.name) else {
            return Err(PackageError::UnknownFunction(function.name));
        };

        functions.push(Function {
            lang: function.lang.or_else(|| runnable.lang.clone()),
            ..function
        });
    }

    for runnable in runnables.iter() {
        if functions.iter().any(|f| f.name == runnable.name) {
            continue;
        }

        match policy {
            AugmentPolicy::AppendUndeclared => {
                tracing::debug!("Adding undeclared runnable {} to directive", runnable.name);
                functions.push(Function {
                    name: runnable.name.clone(),
                    namespace: runnable.namespace.clone(),
                    lang: runnable.lang.clone(),
                    fqfn: None,
                });
            }
            AugmentPolicy::RequireDeclared => {
                return Err(PackageError::UndeclaredRunnable(runnable.name.clone()));
            }
        }
    }

    for function in &mut functions {
        function.fqfn = Some(function.qualified_name(&directive.identifier, &directive.app_version));
    }

    Ok(Directive {
        functions,
        ..directive
    })
}
