use super::psi::{PatEntry, ServiceInfo};
use super::types::{MAX_PIDS_PER_PROGRAM, PAT_PID};
use crate::av::{Discard, StreamKey, WrapReference};
use log::{debug, info};
use std::collections::HashMap;

/// One program of the PAT and what its PMT installed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Program {
    pub id: u16,
    pub pmt_pid: u16,
    /// PIDs belonging to the program: PMT, PCR and elementary streams
    pub pids: Vec<u16>,
    pub pmt_found: bool,
    pub pcr_pid: Option<u16>,
    pub pmt_version: Option<u8>,
    pub discard: Discard,
    /// Elementary PIDs in PMT order
    pub es_pids: Vec<u16>,
    pub streams: Vec<StreamKey>,
    pub wrap: Option<WrapReference>,
}

impl Program {
    pub fn new(id: u16, pmt_pid: u16) -> Self {
        Self {
            id,
            pmt_pid,
            pids: vec![pmt_pid],
            pmt_found: false,
            pcr_pid: None,
            pmt_version: None,
            discard: Discard::None,
            es_pids: Vec::new(),
            streams: Vec::new(),
            wrap: None,
        }
    }

    /// Adds `pid` unless present or the program is full.
    pub fn add_pid(&mut self, pid: u16) {
        if self.pids.contains(&pid) || self.pids.len() >= MAX_PIDS_PER_PROGRAM {
            return;
        }
        self.pids.push(pid);
    }

    /// Forgets every PID except the PMT's own.
    pub fn clear_pids(&mut self) {
        self.pids.clear();
        self.pids.push(self.pmt_pid);
    }

    /// Records the PCR PID and PMT version, logging changes.
    pub fn set_pcr_and_version(&mut self, pcr_pid: u16, version: u8) {
        if let Some(old) = self.pcr_pid.filter(|&old| old != pcr_pid) {
            info!("program {}: PCR pid 0x{:x} -> 0x{:x}", self.id, old, pcr_pid);
        }
        if let Some(old) = self.pmt_version.filter(|&old| old != version) {
            info!("program {}: PMT version {} -> {}", self.id, old, version);
        }
        self.pcr_pid = Some(pcr_pid);
        self.pmt_version = Some(version);
    }
}

/// Programs from the current PAT, in table order.
#[derive(Debug, Default)]
pub struct ProgramTable {
    programs: Vec<Program>,
    /// Service descriptions, kept across PAT changes
    services: HashMap<u16, ServiceInfo>,
}

impl ProgramTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: u16) -> Option<&Program> {
        self.programs.iter().find(|p| p.id == id)
    }

    pub fn get_mut(&mut self, id: u16) -> Option<&mut Program> {
        self.programs.iter_mut().find(|p| p.id == id)
    }

    /// Appends a program, or returns the existing one with that id.
    pub fn add(&mut self, id: u16, pmt_pid: u16) -> &mut Program {
        let index = match self.programs.iter().position(|p| p.id == id) {
            Some(index) => index,
            None => {
                debug!("new program {} pmt pid 0x{:x}", id, pmt_pid);
                self.programs.push(Program::new(id, pmt_pid));
                self.programs.len() - 1
            }
        };
        &mut self.programs[index]
    }

    /// Whether the PAT lists exactly the programs already known, in order.
    pub fn is_same(&self, entries: &[PatEntry]) -> bool {
        self.programs.len() == entries.len()
            && self
                .programs
                .iter()
                .zip(entries)
                .all(|(p, e)| p.id == e.program && p.pmt_pid == e.pmt_pid)
    }

    /// Replaces the programs with the ones of a new PAT and returns the
    /// programs it no longer lists.
    ///
    /// Programs that survive by id keep their stream lists and PMT state.
    pub fn rebuild(&mut self, entries: &[PatEntry]) -> Vec<Program> {
        let mut old = std::mem::take(&mut self.programs);
        for entry in entries {
            let mut program = Program::new(entry.program, entry.pmt_pid);
            if let Some(at) = old.iter().position(|p| p.id == entry.program) {
                let prev = old.remove(at);
                for &pid in prev.pids.iter().filter(|&&pid| pid != prev.pmt_pid) {
                    program.add_pid(pid);
                }
                program.pmt_found = prev.pmt_found && prev.pmt_pid == entry.pmt_pid;
                program.es_pids = prev.es_pids;
                program.streams = prev.streams;
                program.pcr_pid = prev.pcr_pid;
                program.pmt_version = prev.pmt_version;
                program.discard = prev.discard;
                program.wrap = prev.wrap;
            }
            self.programs.push(program);
        }
        old
    }

    /// A PID is discarded when some program holding it is discarded and
    /// none holding it is in use.
    pub fn discard_pid(&self, pid: u16) -> bool {
        if pid == PAT_PID {
            return false;
        }
        let mut used = 0;
        let mut discarded = 0;
        for program in self.programs.iter().filter(|p| p.pids.contains(&pid)) {
            match program.discard {
                Discard::All => discarded += 1,
                Discard::None => used += 1,
            }
        }
        used == 0 && discarded > 0
    }

    /// The first program listing `key`.
    pub fn program_of_stream(&self, key: StreamKey) -> Option<&Program> {
        self.programs.iter().find(|p| p.streams.contains(&key))
    }

    /// Programs whose PMT is carried on `pid`.
    pub fn by_pmt_pid(&self, pid: u16) -> impl Iterator<Item = &Program> {
        self.programs.iter().filter(move |p| p.pmt_pid == pid)
    }

    pub fn all_pmts_found(&self) -> bool {
        self.programs.iter().all(|p| p.pmt_found)
    }

    pub fn set_service(&mut self, service: ServiceInfo) {
        self.services.insert(service.sid, service);
    }

    pub fn service(&self, sid: u16) -> Option<&ServiceInfo> {
        self.services.get(&sid)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Program> {
        self.programs.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Program> {
        self.programs.iter_mut()
    }

    pub fn as_slice(&self) -> &[Program] {
        &self.programs
    }

    pub fn len(&self) -> usize {
        self.programs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }

    /// Empties both the programs and the service table.
    pub fn clear(&mut self) {
        self.programs.clear();
        self.services.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn entries(list: &[(u16, u16)]) -> Vec<PatEntry> {
        list.iter()
            .map(|&(program, pmt_pid)| PatEntry { program, pmt_pid })
            .collect()
    }

    #[test]
    fn test_add_pid_limits() {
        let mut program = Program::new(1, 0x100);
        program.add_pid(0x101);
        program.add_pid(0x101);
        assert_eq!(program.pids, vec![0x100, 0x101]);
        for pid in 0..200 {
            program.add_pid(0x200 + pid);
        }
        assert_eq!(program.pids.len(), MAX_PIDS_PER_PROGRAM);
        program.clear_pids();
        assert_eq!(program.pids, vec![0x100]);
    }

    #[test]
    fn test_is_same_order_matters() {
        let mut table = ProgramTable::new();
        table.rebuild(&entries(&[(1, 0x100), (2, 0x200)]));
        assert!(table.is_same(&entries(&[(1, 0x100), (2, 0x200)])));
        assert!(!table.is_same(&entries(&[(2, 0x200), (1, 0x100)])));
        assert!(!table.is_same(&entries(&[(1, 0x100)])));
        assert!(!table.is_same(&entries(&[(1, 0x101), (2, 0x200)])));
    }

    #[test]
    fn test_discard_policy() {
        let mut table = ProgramTable::new();
        table.rebuild(&entries(&[(1, 0x100), (2, 0x200)]));
        table.get_mut(1).unwrap().add_pid(0x300);
        table.get_mut(2).unwrap().add_pid(0x300);
        table.get_mut(1).unwrap().add_pid(0x301);

        // nothing discarded yet
        assert!(!table.discard_pid(0x301));
        // a PID in no program is kept
        assert!(!table.discard_pid(0x999));

        table.get_mut(1).unwrap().discard = Discard::All;
        assert!(table.discard_pid(0x301));
        // still used by program 2
        assert!(!table.discard_pid(0x300));
        table.get_mut(2).unwrap().discard = Discard::All;
        assert!(table.discard_pid(0x300));
        assert!(!table.discard_pid(PAT_PID));
    }

    #[test]
    fn test_rebuild_carries_surviving_programs() {
        let mut table = ProgramTable::new();
        table.rebuild(&entries(&[(1, 0x100), (2, 0x200)]));
        {
            let p = table.get_mut(1).unwrap();
            p.es_pids.push(0x101);
            p.streams.push(StreamKey(4));
            p.add_pid(0x101);
            p.pmt_found = true;
        }
        let dropped = table.rebuild(&entries(&[(1, 0x110)]));
        assert_eq!(dropped.len(), 1);
        assert_eq!(dropped[0].id, 2);

        let p = table.get(1).unwrap();
        assert_eq!(p.pmt_pid, 0x110);
        assert_eq!(p.es_pids, vec![0x101]);
        assert_eq!(p.pids, vec![0x110, 0x101]);
        // the PMT moved, so it has to be found again
        assert!(!p.pmt_found);
        assert_eq!(table.program_of_stream(StreamKey(4)).map(|p| p.id), Some(1));
    }

    #[test]
    fn test_services_survive_rebuild() {
        let mut table = ProgramTable::new();
        table.set_service(ServiceInfo {
            sid: 1,
            service_type: 1,
            provider: "Acme".into(),
            name: "News".into(),
        });
        table.rebuild(&entries(&[(2, 0x200)]));
        assert_eq!(table.service(1).map(|s| s.name.as_str()), Some("News"));
        table.clear();
        assert!(table.service(1).is_none());
    }
}
