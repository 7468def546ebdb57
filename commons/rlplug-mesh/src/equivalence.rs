use crate::mesh::{AbstractMesh, DeviceId, DeviceMesh};

/// Read access to a placement topology. Accessors return `None` when the
/// topology cannot answer, e.g. an abstract mesh has no devices.
pub trait Topology {
    fn is_empty(&self) -> bool;
    fn axis_names(&self) -> Option<&[String]>;
    fn shape(&self) -> Option<&[usize]>;
    fn device_ids(&self) -> Option<&[DeviceId]>;
}

impl Topology for DeviceMesh {
    fn is_empty(&self) -> bool {
        DeviceMesh::is_empty(self)
    }

    fn axis_names(&self) -> Option<&[String]> {
        Some(DeviceMesh::axis_names(self))
    }

    fn shape(&self) -> Option<&[usize]> {
        Some(DeviceMesh::shape(self))
    }

    fn device_ids(&self) -> Option<&[DeviceId]> {
        Some(self.devices())
    }
}

impl Topology for AbstractMesh {
    fn is_empty(&self) -> bool {
        self.axis_names().is_empty()
    }

    fn axis_names(&self) -> Option<&[String]> {
        Some(AbstractMesh::axis_names(self))
    }

    fn shape(&self) -> Option<&[usize]> {
        Some(AbstractMesh::shape(self))
    }

    fn device_ids(&self) -> Option<&[DeviceId]> {
        None
    }
}

/// Whether data laid out on `a` can be used on `b` without moving it.
///
/// The same instance and two empty meshes are always equivalent. Otherwise
/// axis names, shape and the flattened device sequence must all match. Any
/// property a topology cannot report makes the pair non-equivalent.
pub fn equivalent<A, B>(a: &A, b: &B) -> bool
where
    A: Topology + ?Sized,
    B: Topology + ?Sized,
{
    if std::ptr::addr_eq(a as *const A, b as *const B) {
        return true;
    }
    if a.is_empty() && b.is_empty() {
        return true;
    }
    let same = || -> Option<bool> {
        if a.axis_names()? != b.axis_names()? {
            return Some(false);
        }
        if a.shape()? != b.shape()? {
            return Some(false);
        }
        Some(a.device_ids()? == b.device_ids()?)
    };
    same().unwrap_or(false)
}
