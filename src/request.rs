use super::address;

/// A memory request passing through the address-mapping stage.
///
/// `addr` is the flat physical byte address issued by the front end.
/// `addr_vec` holds one slot per hierarchy level after mapping; `None`
/// marks a slot that is not yet mapped or belongs to a level the device
/// topology does not have.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Request {
    pub addr: address,
    pub addr_vec: Vec<Option<u64>>,
}

impl Request {
    #[must_use]
    pub fn new(addr: address) -> Self {
        Self {
            addr,
            addr_vec: Vec::new(),
        }
    }
}

impl std::fmt::Display for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "Request({:#x} => {:?})", self.addr, self.addr_vec)
    }
}
