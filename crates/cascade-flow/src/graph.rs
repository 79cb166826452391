//! The module graph: a validated DAG of mappers and stores.
//!
//! A manifest declares modules by name with typed inputs. Validation
//! checks that inputs resolve, kinds match, start blocks never decrease
//! along dependency edges, and the graph is acyclic. Each module gets a
//! deterministic hash covering its code, configuration, and transitive
//! inputs, which keys its persisted store segments.

use std::collections::{HashMap, HashSet};

use bytes::Bytes;
use sha2::{Digest, Sha256};

use cascade_store::{UpdatePolicy, ValueType};

use crate::dag::Dag;
use crate::error::{Error, Result};

/// What a module is: a pure mapper or a stateful store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleKind {
    /// A pure function of its inputs producing output bytes per block.
    Mapper {
        /// Declared output type name (informational).
        output_type: String,
    },
    /// A stateful key/value store mutated by its module code.
    Store {
        /// How writes to existing keys resolve, and how segments merge.
        update_policy: UpdatePolicy,
        /// The declared value type.
        value_type: ValueType,
    },
}

/// One declared input of a module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleInput {
    /// The raw block stream.
    Source,
    /// The per-block output of a mapper module.
    Map {
        /// The mapper's name.
        module: String,
    },
    /// A store module's state.
    Store {
        /// The store's name.
        module: String,
        /// How the store is consumed.
        mode: StoreAccessMode,
    },
}

impl ModuleInput {
    /// The referenced module name, if this input names one.
    #[must_use]
    pub fn module_name(&self) -> Option<&str> {
        match self {
            Self::Source => None,
            Self::Map { module } | Self::Store { module, .. } => Some(module),
        }
    }
}

/// How a store input is consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreAccessMode {
    /// Random-access reads of current state.
    Get,
    /// The block's delta list.
    Deltas,
}

/// One module declaration from the manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Module {
    /// Unique module name.
    pub name: String,
    /// Mapper or store, with kind-specific configuration.
    pub kind: ModuleKind,
    /// The module's code bytes (hash input; executed by the runtime).
    pub code: Bytes,
    /// First block this module processes.
    pub start_block: u64,
    /// Declared inputs, in order.
    pub inputs: Vec<ModuleInput>,
}

impl Module {
    /// Returns true for store modules.
    #[must_use]
    pub const fn is_store(&self) -> bool {
        matches!(self.kind, ModuleKind::Store { .. })
    }
}

/// A validated module graph with deterministic hashes and a topological
/// execution order.
#[derive(Debug, Clone)]
pub struct ModuleGraph {
    modules: HashMap<String, Module>,
    hashes: HashMap<String, String>,
    order: Vec<String>,
}

impl ModuleGraph {
    /// Builds and validates a graph from manifest modules.
    ///
    /// # Errors
    ///
    /// Returns an invalid-argument error for duplicate names, unresolved
    /// or mistyped inputs, or start blocks that decrease along a
    /// dependency edge; returns a cycle error for cyclic graphs.
    pub fn new(manifest: Vec<Module>) -> Result<Self> {
        let mut modules: HashMap<String, Module> = HashMap::with_capacity(manifest.len());
        let mut dag: Dag<String> = Dag::new();

        for module in &manifest {
            if modules.contains_key(&module.name) {
                return Err(Error::invalid_argument(format!(
                    "duplicate module name {:?}",
                    module.name
                )));
            }
            modules.insert(module.name.clone(), module.clone());
            dag.add_node(module.name.clone());
        }

        for module in &manifest {
            for input in &module.inputs {
                let Some(input_name) = input.module_name() else {
                    continue;
                };
                let Some(input_module) = modules.get(input_name) else {
                    return Err(Error::invalid_argument(format!(
                        "module {:?} input references unknown module {input_name:?}",
                        module.name
                    )));
                };
                match input {
                    ModuleInput::Map { .. } if input_module.is_store() => {
                        return Err(Error::invalid_argument(format!(
                            "module {:?} consumes {input_name:?} as a map, but it is a store",
                            module.name
                        )));
                    }
                    ModuleInput::Store { .. } if !input_module.is_store() => {
                        return Err(Error::invalid_argument(format!(
                            "module {:?} consumes {input_name:?} as a store, but it is a mapper",
                            module.name
                        )));
                    }
                    _ => {}
                }
                if module.start_block < input_module.start_block {
                    return Err(Error::invalid_argument(format!(
                        "module {:?} starts at block {} before its input {input_name:?} at {}",
                        module.name, module.start_block, input_module.start_block
                    )));
                }
                let from = dag.add_node(input_name.to_string());
                let to = dag.add_node(module.name.clone());
                dag.add_edge(from, to);
            }
        }

        let order = dag.toposort()?;
        let hashes = compute_hashes(&modules, &order);

        Ok(Self {
            modules,
            hashes,
            order,
        })
    }

    /// Looks up a module by name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ModuleNotFound`] for unknown names.
    pub fn module(&self, name: &str) -> Result<&Module> {
        self.modules.get(name).ok_or_else(|| Error::ModuleNotFound {
            name: name.to_string(),
        })
    }

    /// The deterministic hash of a module.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ModuleNotFound`] for unknown names.
    pub fn hash(&self, name: &str) -> Result<&str> {
        self.hashes
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| Error::ModuleNotFound {
                name: name.to_string(),
            })
    }

    /// Module names in topological execution order.
    #[must_use]
    pub fn topological_order(&self) -> &[String] {
        &self.order
    }

    /// The modules needed to produce the given outputs, in topological
    /// order: the outputs themselves plus every transitive input.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ModuleNotFound`] when an output name is unknown.
    pub fn required_modules(&self, outputs: &[String]) -> Result<Vec<&Module>> {
        let mut required: HashSet<&str> = HashSet::new();
        let mut stack: Vec<&str> = Vec::new();
        for name in outputs {
            self.module(name)?;
            stack.push(name);
        }
        while let Some(name) = stack.pop() {
            if !required.insert(name) {
                continue;
            }
            let module = self.module(name)?;
            for input in &module.inputs {
                if let Some(input_name) = input.module_name() {
                    stack.push(input_name);
                }
            }
        }

        Ok(self
            .order
            .iter()
            .filter(|name| required.contains(name.as_str()))
            .filter_map(|name| self.modules.get(name))
            .collect())
    }

    /// The store modules among the required set, in topological order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ModuleNotFound`] when an output name is unknown.
    pub fn required_stores(&self, outputs: &[String]) -> Result<Vec<&Module>> {
        Ok(self
            .required_modules(outputs)?
            .into_iter()
            .filter(|m| m.is_store())
            .collect())
    }

    /// The block the pipeline must actually begin at to serve
    /// `request_start`: the lowest start block among required *store*
    /// modules not above the request start. Mappers are pure per-block
    /// functions and need no earlier replay; only store state has to be
    /// reconstructed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ModuleNotFound`] when an output name is unknown.
    pub fn effective_start_block(&self, outputs: &[String], request_start: u64) -> Result<u64> {
        let lowest = self
            .required_stores(outputs)?
            .iter()
            .map(|m| m.start_block)
            .filter(|start| *start <= request_start)
            .min();
        Ok(lowest.unwrap_or(request_start))
    }

    /// Fails when the effective start block precedes an output module's
    /// start block: nothing can be served for an output module before it
    /// exists.
    ///
    /// # Errors
    ///
    /// Returns an invalid-argument error naming the first violating
    /// module.
    pub fn validate_effective_start_block(
        &self,
        outputs: &[String],
        effective: u64,
    ) -> Result<()> {
        for name in outputs {
            let module = self.module(name)?;
            if effective < module.start_block {
                return Err(Error::invalid_argument(format!(
                    "effective start block {effective} is before start block {} of module {:?}",
                    module.start_block, module.name
                )));
            }
        }
        Ok(())
    }
}

/// Hashes every module, inputs before dependents so that transitive
/// hashes are available.
fn compute_hashes(
    modules: &HashMap<String, Module>,
    order: &[String],
) -> HashMap<String, String> {
    let mut hashes: HashMap<String, String> = HashMap::with_capacity(order.len());
    for name in order {
        let Some(module) = modules.get(name) else {
            continue;
        };
        let mut hasher = Sha256::new();
        hasher.update(module.name.as_bytes());
        hasher.update(module.start_block.to_le_bytes());
        match &module.kind {
            ModuleKind::Mapper { output_type } => {
                hasher.update(b"mapper");
                hasher.update(output_type.as_bytes());
            }
            ModuleKind::Store {
                update_policy,
                value_type,
            } => {
                hasher.update(b"store");
                hasher.update(update_policy.as_tag().as_bytes());
                hasher.update(value_type.as_tag().as_bytes());
            }
        }
        hasher.update(&module.code);
        for input in &module.inputs {
            match input {
                ModuleInput::Source => hasher.update(b"source"),
                ModuleInput::Map { module } => {
                    hasher.update(b"map");
                    hasher.update(module.as_bytes());
                }
                ModuleInput::Store { module, mode } => {
                    hasher.update(b"store-input");
                    hasher.update(module.as_bytes());
                    hasher.update(match mode {
                        StoreAccessMode::Get => b"get".as_slice(),
                        StoreAccessMode::Deltas => b"deltas".as_slice(),
                    });
                }
            }
            if let Some(input_name) = input.module_name() {
                if let Some(input_hash) = hashes.get(input_name) {
                    hasher.update(input_hash.as_bytes());
                }
            }
        }
        let digest = hasher.finalize();
        let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
        hashes.insert(name.clone(), hex);
    }
    hashes
}
