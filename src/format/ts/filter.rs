use super::pes::PesContext;
use super::section::SectionFilter;
use super::types::NB_PID_MAX;
use log::trace;

/// What a PID filter does with the payload it receives
pub enum FilterKind {
    Section(SectionFilter),
    Pes(Box<PesContext>),
    /// Only PCR values are recorded
    Pcr,
}

/// Per-PID demultiplexing state
pub struct PidFilter {
    pub pid: u16,
    /// `None` until the first packet
    pub last_cc: Option<u8>,
    /// Last PCR seen on this PID, in 27 MHz units
    pub last_pcr: Option<i64>,
    pub discard: bool,
    /// Treat PMT sections as ending with their first TS packet
    pub pmt_chop_at_ts: bool,
    /// MPEG-4 elementary stream id bound to this PID
    pub es_id: Option<u16>,
    pub kind: FilterKind,
}

impl PidFilter {
    pub fn new(pid: u16, kind: FilterKind) -> Self {
        Self {
            pid,
            last_cc: None,
            last_pcr: None,
            discard: false,
            pmt_chop_at_ts: false,
            es_id: None,
            kind,
        }
    }

    pub fn is_section(&self) -> bool {
        matches!(self.kind, FilterKind::Section(_))
    }

    pub fn is_pes(&self) -> bool {
        matches!(self.kind, FilterKind::Pes(_))
    }

    pub fn section(&self) -> Option<&SectionFilter> {
        match &self.kind {
            FilterKind::Section(section) => Some(section),
            _ => None,
        }
    }

    pub fn section_mut(&mut self) -> Option<&mut SectionFilter> {
        match &mut self.kind {
            FilterKind::Section(section) => Some(section),
            _ => None,
        }
    }

    pub fn pes(&self) -> Option<&PesContext> {
        match &self.kind {
            FilterKind::Pes(pes) => Some(pes),
            _ => None,
        }
    }

    pub fn pes_mut(&mut self) -> Option<&mut PesContext> {
        match &mut self.kind {
            FilterKind::Pes(pes) => Some(pes),
            _ => None,
        }
    }
}

/// Flat PID-indexed filter table; at most one filter per PID.
pub struct FilterTable {
    filters: Vec<Option<PidFilter>>,
}

impl FilterTable {
    pub fn new() -> Self {
        let mut filters = Vec::with_capacity(NB_PID_MAX);
        filters.resize_with(NB_PID_MAX, || None);
        Self { filters }
    }

    pub fn get(&self, pid: u16) -> Option<&PidFilter> {
        self.filters.get(pid as usize)?.as_ref()
    }

    pub fn get_mut(&mut self, pid: u16) -> Option<&mut PidFilter> {
        self.filters.get_mut(pid as usize)?.as_mut()
    }

    pub fn contains(&self, pid: u16) -> bool {
        self.get(pid).is_some()
    }

    /// Installs `filter`, closing whatever was on its PID.
    pub fn insert(&mut self, filter: PidFilter) -> Option<PidFilter> {
        let pid = filter.pid;
        trace!("Filter: pid=0x{:x}", pid);
        let old = self.filters[pid as usize].replace(filter);
        if old.is_some() {
            trace!("Filter: replaced existing filter on pid 0x{:x}", pid);
        }
        old
    }

    /// Closes the filter on `pid`.
    pub fn remove(&mut self, pid: u16) -> Option<PidFilter> {
        let old = self.filters.get_mut(pid as usize)?.take();
        if old.is_some() {
            trace!("Filter: close pid=0x{:x}", pid);
        }
        old
    }

    /// Temporarily takes a filter out so it can run against the rest of the
    /// context; pair with [`FilterTable::restore`].
    pub fn take(&mut self, pid: u16) -> Option<PidFilter> {
        self.filters.get_mut(pid as usize)?.take()
    }

    /// Puts a taken filter back unless something else was installed meanwhile.
    pub fn restore(&mut self, filter: PidFilter) {
        let slot = &mut self.filters[filter.pid as usize];
        if slot.is_none() {
            *slot = Some(filter);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &PidFilter> {
        self.filters.iter().flatten()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut PidFilter> {
        self.filters.iter_mut().flatten()
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&mut self) {
        for slot in self.filters.iter_mut() {
            *slot = None;
        }
    }
}

impl Default for FilterTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_filter_per_pid() {
        let mut table = FilterTable::new();
        assert!(table.insert(PidFilter::new(0x100, FilterKind::Pcr)).is_none());
        let old = table.insert(PidFilter::new(0x100, FilterKind::Pcr));
        assert!(old.is_some());
        assert_eq!(table.len(), 1);
        assert!(table.remove(0x100).is_some());
        assert!(table.is_empty());
    }

    #[test]
    fn test_take_and_restore() {
        let mut table = FilterTable::new();
        table.insert(PidFilter::new(0x20, FilterKind::Pcr));
        let mut taken = table.take(0x20).unwrap();
        assert!(!table.contains(0x20));
        taken.last_pcr = Some(42);
        table.restore(taken);
        assert_eq!(table.get(0x20).unwrap().last_pcr, Some(42));

        // a replacement installed while taken wins
        let taken = table.take(0x20).unwrap();
        table.insert(PidFilter::new(0x20, FilterKind::Pcr));
        table.restore(taken);
        assert_eq!(table.get(0x20).unwrap().last_pcr, None);
    }
}
