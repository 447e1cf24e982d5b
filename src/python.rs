//! Python bindings for the event-driven engine.
//!
//! Exposes a single `Gas` class wrapping [`Simulation`] with NumPy state
//! access. Long advances release the GIL.

use numpy::ndarray::Array2;
use numpy::{IntoPyArray, PyArray2, PyReadonlyArray2};
use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;
use pyo3::types::PyDict;

use crate::core::particle::DIM;
use crate::core::{Domain, Simulation};

fn py_err<E: ToString>(e: E) -> PyErr {
    PyValueError::new_err(e.to_string())
}

/// Python-facing wrapper around the Rust simulation core.
///
/// Constructor builds an elastic gas of equal spheres at random
/// non-overlapping positions:
/// - `Gas(num_particles, box_size, radius=0.5, mass=1.0, speed=1.0,
///   seed=0, periodic=False)`
#[pyclass]
pub struct Gas {
    sim: Simulation,
}

#[pymethods]
impl Gas {
    /// Initialize a random elastic gas in an axis-aligned 3D box.
    ///
    /// Parameters
    /// - num_particles: number of particles (int, >= 0)
    /// - box_size: iterable of 3 positive floats [Lx, Ly, Lz]
    /// - radius: sphere radius (float, > 0)
    /// - mass: particle mass (float, > 0)
    /// - speed: initial speed, directions drawn isotropically
    /// - seed: RNG seed for reproducible placement
    /// - periodic: wrap all axes instead of reflecting walls
    ///
    /// Errors: raises ValueError on invalid parameters or if the packing is
    /// too dense to place every particle.
    #[new]
    #[pyo3(signature = (num_particles, box_size, radius=0.5, mass=1.0, speed=1.0, seed=0, periodic=false))]
    fn new(
        num_particles: usize,
        box_size: Vec<f64>,
        radius: f64,
        mass: f64,
        speed: f64,
        seed: u64,
        periodic: bool,
    ) -> PyResult<Self> {
        if box_size.len() != DIM {
            return Err(py_err(format!("box_size must have length {DIM}")));
        }
        let mut lengths = [0.0f64; DIM];
        lengths.copy_from_slice(&box_size);
        let domain = if periodic {
            Domain::periodic(lengths)
        } else {
            Domain::reflecting(lengths)
        }
        .map_err(py_err)?;
        let sim = Simulation::random_gas(domain, num_particles, radius, mass, speed, seed)
            .map_err(py_err)?;
        Ok(Self { sim })
    }

    /// Advance to the given absolute time (releases the GIL).
    fn advance_to(&mut self, py: Python<'_>, target_time: f64) -> PyResult<()> {
        py.detach(|| self.sim.run_until(target_time))
            .map(|_| ())
            .map_err(py_err)
    }

    /// Resolve at most `n` events (releases the GIL). Returns the number of
    /// events actually realized.
    fn advance_events(&mut self, py: Python<'_>, n: u64) -> PyResult<u64> {
        let before = self.sim.stats().events;
        py.detach(|| self.sim.run_events(n)).map_err(py_err)?;
        Ok(self.sim.stats().events - before)
    }

    /// Current simulation time.
    fn time(&self) -> f64 {
        self.sim.clock()
    }

    /// Number of particles.
    fn num_particles(&self) -> usize {
        self.sim.store().len()
    }

    /// Total kinetic energy.
    fn kinetic_energy(&self) -> f64 {
        self.sim.kinetic_energy()
    }

    /// Kinetic temperature of the dynamic particles (k_B = 1).
    fn temperature(&self) -> f64 {
        self.sim.temperature()
    }

    /// Positions as a NumPy array of shape (N, 3), dtype=float64, all
    /// brought current to the simulation clock.
    fn get_positions<'py>(&mut self, py: Python<'py>) -> PyResult<Py<PyArray2<f64>>> {
        self.sim.synchronize().map_err(py_err)?;
        let particles = self.sim.store().particles();
        let mut arr = Array2::<f64>::zeros((particles.len(), DIM));
        for (i, p) in particles.iter().enumerate() {
            for k in 0..DIM {
                arr[[i, k]] = p.r[k];
            }
        }
        Ok(arr.into_pyarray(py).to_owned().into())
    }

    /// Velocities as a NumPy array of shape (N, 3), dtype=float64.
    fn get_velocities<'py>(&self, py: Python<'py>) -> PyResult<Py<PyArray2<f64>>> {
        let particles = self.sim.store().particles();
        let mut arr = Array2::<f64>::zeros((particles.len(), DIM));
        for (i, p) in particles.iter().enumerate() {
            for k in 0..DIM {
                arr[[i, k]] = p.v[k];
            }
        }
        Ok(arr.into_pyarray(py).to_owned().into())
    }

    /// Overwrite all velocities from a NumPy array of shape (N, 3). Values
    /// must be finite; static particles must keep zero velocity. Predictions
    /// are rebuilt afterwards.
    fn set_velocities<'py>(&mut self, velocities: PyReadonlyArray2<'py, f64>) -> PyResult<()> {
        let arr = velocities.as_array();
        let n = self.sim.store().len();
        if arr.shape() != [n, DIM] {
            return Err(py_err(format!(
                "velocities must have shape ({n}, {DIM}), got {:?}",
                arr.shape()
            )));
        }
        self.sim.synchronize().map_err(py_err)?;
        for (i, p) in self.sim.store_mut().particles_mut().iter_mut().enumerate() {
            let mut v = [0.0f64; DIM];
            for k in 0..DIM {
                let val = arr[[i, k]];
                if !val.is_finite() {
                    return Err(py_err("velocity values must be finite"));
                }
                v[k] = val;
            }
            if !p.is_dynamic() && v.iter().any(|&c| c != 0.0) {
                return Err(py_err(format!(
                    "particle {i} is static and must keep zero velocity"
                )));
            }
            p.v = v;
        }
        self.sim.rebuild().map_err(py_err)
    }

    /// Event counters as a dict: events, pair_collisions, well_entries,
    /// well_escapes, well_reflections, wall_bounces, wraps, stale_discarded,
    /// repredictions.
    fn get_stats<'py>(&self, py: Python<'py>) -> PyResult<Py<PyDict>> {
        let s = self.sim.stats();
        let out = PyDict::new(py);
        out.set_item("events", s.events)?;
        out.set_item("pair_collisions", s.pair_collisions)?;
        out.set_item("well_entries", s.well_entries)?;
        out.set_item("well_escapes", s.well_escapes)?;
        out.set_item("well_reflections", s.well_reflections)?;
        out.set_item("wall_bounces", s.wall_bounces)?;
        out.set_item("wraps", s.wraps)?;
        out.set_item("stale_discarded", s.stale_discarded)?;
        out.set_item("repredictions", s.repredictions)?;
        Ok(out.into())
    }

    /// Run the internal consistency audit; raises ValueError on corruption.
    fn audit(&self) -> PyResult<()> {
        self.sim.audit().map_err(py_err)
    }
}

/// The edmd Python module entry point.
#[pymodule]
fn edmd(_py: Python<'_>, m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<Gas>()?;
    Ok(())
}
