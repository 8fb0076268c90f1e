//! Python bindings.
//!
//! Exposes a runtime to Python hosts. Values are arbitrary Python objects
//! compared with `==`; computations, effects and bindings are Python
//! callables. The runtime is `!Send`, so the class is unsendable and must be
//! used from the thread that created it.

use std::cell::RefCell;
use std::rc::Rc;

use pyo3::exceptions::{PyRuntimeError, PyTypeError};
use pyo3::prelude::*;

use crate::config::RuntimeConfig;
use crate::error::Error;
use crate::reactive::{Derived, Effect, Runtime, Source};
use crate::trigger::TriggerSubscription;
use crate::view::{RefreshPolicy, UnitId};

/// A Python object stored in the graph.
#[derive(Clone)]
struct PyValue(Rc<PyObject>);

impl PyValue {
    fn new(object: PyObject) -> Self {
        Self(Rc::new(object))
    }
}

fn py_eq(a: &PyValue, b: &PyValue) -> bool {
    Python::with_gil(|py| a.0.bind(py).eq(b.0.bind(py)).unwrap_or(false))
}

fn to_py(err: Error) -> PyErr {
    PyRuntimeError::new_err(err.to_string())
}

fn from_py(err: PyErr) -> Error {
    Error::host(err.to_string())
}

#[derive(Clone, Copy)]
enum NodeRef {
    Source(Source<PyValue>),
    Derived(Derived<PyValue>),
}

/// Handle to a source or derived node.
#[pyclass(name = "Node")]
#[derive(Clone, Copy)]
pub struct PyNode {
    handle: NodeRef,
}

#[pymethods]
impl PyNode {
    #[getter]
    fn id(&self) -> u64 {
        match self.handle {
            NodeRef::Source(source) => source.id().raw(),
            NodeRef::Derived(derived) => derived.id().raw(),
        }
    }

    #[getter]
    fn is_source(&self) -> bool {
        matches!(self.handle, NodeRef::Source(_))
    }

    fn __repr__(&self) -> String {
        let kind = if self.is_source() { "source" } else { "derived" };
        format!("Node(id={}, kind={})", self.id(), kind)
    }
}

#[pyclass(name = "Effect")]
#[derive(Clone, Copy)]
pub struct PyEffect {
    effect: Effect,
}

#[pymethods]
impl PyEffect {
    #[getter]
    fn id(&self) -> u64 {
        self.effect.id().raw()
    }
}

#[pyclass(name = "Unit")]
#[derive(Clone, Copy)]
pub struct PyUnit {
    id: UnitId,
}

#[pymethods]
impl PyUnit {
    #[getter]
    fn id(&self) -> u64 {
        self.id.raw()
    }

    fn __repr__(&self) -> String {
        format!("Unit(id={})", self.id.raw())
    }
}

#[pyclass(unsendable, name = "Runtime")]
pub struct PyRuntime {
    runtime: Runtime,
    subscriptions: RefCell<Vec<TriggerSubscription>>,
}

#[pymethods]
impl PyRuntime {
    #[new]
    #[pyo3(signature = (config = None))]
    fn new(config: Option<&str>) -> PyResult<Self> {
        let config = match config {
            Some(json) => RuntimeConfig::from_json(json).map_err(to_py)?,
            None => RuntimeConfig::default(),
        };
        Ok(Self {
            runtime: Runtime::with_config(config),
            subscriptions: RefCell::new(Vec::new()),
        })
    }

    fn source(&self, value: PyObject) -> PyNode {
        let source = self.runtime.create_source_with(PyValue::new(value), py_eq);
        PyNode {
            handle: NodeRef::Source(source),
        }
    }

    fn derived(&self, compute: PyObject) -> PyNode {
        let derived = self.runtime.create_derived_with(
            move |_| {
                Python::with_gil(|py| compute.call0(py))
                    .map(PyValue::new)
                    .map_err(from_py)
            },
            py_eq,
        );
        PyNode {
            handle: NodeRef::Derived(derived),
        }
    }

    fn effect(&self, body: PyObject) -> PyResult<PyEffect> {
        let effect = self
            .runtime
            .create_effect(move |_| {
                Python::with_gil(|py| body.call0(py))
                    .map(|_| ())
                    .map_err(from_py)
            })
            .map_err(to_py)?;
        Ok(PyEffect { effect })
    }

    fn read(&self, py: Python<'_>, node: PyNode) -> PyResult<PyObject> {
        let value = match node.handle {
            NodeRef::Source(source) => self.runtime.read(source),
            NodeRef::Derived(derived) => self.runtime.read(derived),
        }
        .map_err(to_py)?;
        Ok(value.0.clone_ref(py))
    }

    fn write(&self, node: PyNode, value: PyObject) -> PyResult<()> {
        match node.handle {
            NodeRef::Source(source) => self
                .runtime
                .write(source, PyValue::new(value))
                .map_err(to_py),
            NodeRef::Derived(_) => Err(PyTypeError::new_err("derived nodes cannot be written")),
        }
    }

    fn destroy(&self, node: PyNode) -> PyResult<()> {
        match node.handle {
            NodeRef::Source(source) => self.runtime.destroy(source),
            NodeRef::Derived(derived) => self.runtime.destroy(derived),
        }
        .map_err(to_py)
    }

    fn dispose(&self, effect: PyEffect) -> PyResult<()> {
        self.runtime.destroy(effect.effect).map_err(to_py)
    }

    #[pyo3(signature = (parent = None, on_demand = false))]
    fn unit(&self, parent: Option<PyUnit>, on_demand: bool) -> PyResult<PyUnit> {
        let policy = if on_demand {
            RefreshPolicy::OnDemand
        } else {
            RefreshPolicy::CheckAlways
        };
        let id = self
            .runtime
            .create_unit(parent.map(|p| p.id), policy)
            .map_err(to_py)?;
        Ok(PyUnit { id })
    }

    /// Attach `callback(unit_id)` as a binding of `unit`.
    fn bind(&self, unit: PyUnit, callback: PyObject) -> PyResult<()> {
        self.runtime
            .bind(unit.id, move |_, id: UnitId| {
                Python::with_gil(|py| callback.call1(py, (id.raw(),)))
                    .map(|_| ())
                    .map_err(from_py)
            })
            .map_err(to_py)
    }

    fn mark_dirty(&self, unit: PyUnit) -> PyResult<PyUnit> {
        let root = self.runtime.mark_dirty(unit.id).map_err(to_py)?;
        Ok(PyUnit { id: root })
    }

    /// Returns `(refreshed, effects_run, targeted_passes)`.
    fn tick(&self, root: PyUnit) -> PyResult<(usize, usize, usize)> {
        let report = self.runtime.tick(root.id).map_err(to_py)?;
        Ok((report.refreshed, report.effects_run, report.targeted_passes))
    }

    fn force_refresh(&self, unit: PyUnit) -> PyResult<(usize, usize, usize)> {
        let report = self.runtime.force_refresh(unit.id).map_err(to_py)?;
        Ok((report.refreshed, report.effects_run, report.targeted_passes))
    }

    fn detach(&self, unit: PyUnit) -> PyResult<()> {
        self.runtime.detach(unit.id).map_err(to_py)
    }

    fn reattach(&self, unit: PyUnit) -> PyResult<()> {
        self.runtime.reattach(unit.id).map_err(to_py)
    }

    fn destroy_unit(&self, unit: PyUnit) -> PyResult<()> {
        self.runtime.destroy_unit(unit.id).map_err(to_py)
    }

    fn request_tick(&self) -> bool {
        self.runtime.request_tick()
    }

    /// Call `callback()` whenever a tick is requested.
    fn on_trigger(&self, callback: PyObject) {
        let subscription = self.runtime.on_trigger(move || {
            Python::with_gil(|py| {
                if let Err(err) = callback.call0(py) {
                    tracing::warn!(error = %err, "trigger callback raised");
                }
            })
        });
        self.subscriptions.borrow_mut().push(subscription);
    }

    fn enter_quiet(&self) {
        self.runtime.enter_quiet();
    }

    fn exit_quiet(&self) {
        self.runtime.exit_quiet();
    }

    /// Graph counters as a JSON object.
    fn stats(&self) -> PyResult<String> {
        serde_json::to_string(&self.runtime.stats()).map_err(|err| to_py(err.into()))
    }

    /// The subtree under `root` as a JSON document.
    fn snapshot(&self, root: PyUnit) -> PyResult<String> {
        let snapshot = self.runtime.snapshot(root.id).map_err(to_py)?;
        serde_json::to_string(&snapshot).map_err(|err| to_py(err.into()))
    }
}

/// Python module definition.
///
/// This function is called by Python when importing the module.
#[pymodule]
fn _core(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<PyRuntime>()?;
    m.add_class::<PyNode>()?;
    m.add_class::<PyEffect>()?;
    m.add_class::<PyUnit>()?;

    // Add version info
    m.add("__version__", env!("CARGO_PKG_VERSION"))?;

    Ok(())
}
