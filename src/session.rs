//! Explicit session state for a UI host: one shared roster and two
//! independent flows. Nothing here is global; a host owns a `Session`.

use tracing::{info, warn};

use crate::config::Config;
use crate::error::{EtlError, Result};
use crate::loader::load;
use crate::pipeline::{
    run_flow_observed, FlowConfig, FlowKind, FlowStage, PipelineOptions, ProcessedTable,
};
use crate::roster::{Roster, RosterColumns};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowFailure {
    /// Last stage completed before the error.
    pub reached: FlowStage,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct Flow {
    config: FlowConfig,
    stage: FlowStage,
    table: Option<ProcessedTable>,
    failure: Option<FlowFailure>,
}

impl Flow {
    fn new(config: FlowConfig) -> Self {
        Self {
            config,
            stage: FlowStage::WaitingForRoster,
            table: None,
            failure: None,
        }
    }

    fn reset(&mut self, stage: FlowStage) {
        self.stage = stage;
        self.table = None;
        self.failure = None;
    }

    pub fn config(&self) -> &FlowConfig {
        &self.config
    }

    pub fn stage(&self) -> FlowStage {
        self.stage
    }

    pub fn table(&self) -> Option<&ProcessedTable> {
        self.table.as_ref()
    }

    pub fn failure(&self) -> Option<&FlowFailure> {
        self.failure.as_ref()
    }
}

#[derive(Debug, Clone)]
pub struct Session {
    roster_columns: RosterColumns,
    options: PipelineOptions,
    roster: Option<Roster>,
    awards: Flow,
    proposals: Flow,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self::with_config(&Config::default())
    }

    pub fn with_config(config: &Config) -> Self {
        Self {
            roster_columns: config.roster_columns(),
            options: config.pipeline_options(),
            roster: None,
            awards: Flow::new(config.flow(FlowKind::Awards)),
            proposals: Flow::new(config.flow(FlowKind::Proposals)),
        }
    }

    pub fn roster(&self) -> Option<&Roster> {
        self.roster.as_ref()
    }

    pub fn flow(&self, kind: FlowKind) -> &Flow {
        match kind {
            FlowKind::Awards => &self.awards,
            FlowKind::Proposals => &self.proposals,
        }
    }

    /// Parse and install a roster from uploaded bytes.
    ///
    /// Success replaces any previous roster and resets both flows to wait for
    /// a transactional file. Failure drops the previous roster too, since the
    /// upload it came from has been replaced.
    pub fn load_roster(&mut self, bytes: &[u8]) -> Result<&Roster> {
        let parsed = load(bytes, &self.options.loader).and_then(|loaded| {
            Roster::from_table(loaded.frame, &self.roster_columns, self.options.id_coercion)
        });
        match parsed {
            Ok(roster) => Ok(self.set_roster(roster)),
            Err(e) => {
                warn!(error = %e, "roster upload failed");
                self.roster = None;
                self.awards.reset(FlowStage::WaitingForRoster);
                self.proposals.reset(FlowStage::WaitingForRoster);
                Err(e)
            }
        }
    }

    /// Install an already-built roster.
    pub fn set_roster(&mut self, roster: Roster) -> &Roster {
        self.awards.reset(FlowStage::WaitingForTransactionalFile);
        self.proposals.reset(FlowStage::WaitingForTransactionalFile);
        self.roster.insert(roster)
    }

    /// Run one flow on a fresh upload. The previous table of that flow is
    /// discarded first; the other flow is never touched.
    pub fn upload(&mut self, kind: FlowKind, bytes: &[u8]) -> Result<&ProcessedTable> {
        let flow = match kind {
            FlowKind::Awards => &mut self.awards,
            FlowKind::Proposals => &mut self.proposals,
        };
        let Some(roster) = self.roster.as_ref() else {
            return Err(EtlError::RosterNotLoaded);
        };

        flow.reset(FlowStage::WaitingForTransactionalFile);
        let config = flow.config.clone();
        let mut reached = FlowStage::WaitingForTransactionalFile;
        let result = run_flow_observed(bytes, roster, &config, &self.options, |stage| {
            reached = stage
        });

        flow.stage = reached;
        match result {
            Ok(table) => {
                info!(flow = %kind, file = table.file_name(), "ready for export");
                Ok(flow.table.insert(table))
            }
            Err(e) => {
                warn!(flow = %kind, stage = %reached, error = %e, "flow failed");
                flow.failure = Some(FlowFailure {
                    reached,
                    message: e.to_string(),
                });
                Err(e)
            }
        }
    }

    pub fn preview(&self, kind: FlowKind) -> Option<polars::prelude::DataFrame> {
        self.flow(kind).table().map(ProcessedTable::preview)
    }

    pub fn export(&self, kind: FlowKind) -> Result<Vec<u8>> {
        self.flow(kind)
            .table()
            .ok_or_else(|| EtlError::General(format!("No processed {kind} table to export")))?
            .to_xlsx()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROSTER: &str = "Award PI Campus ID,Department\n100,Genetics\n200,Ecology\nn/a,Unknown\n";
    const AWARDS: &str = "Award PI Campus ID,Award Finalize Date\n100,2025-08-01\n300,2025-08-01\n";
    const PROPOSALS: &str = "Proposal PI Campus ID,Proposal Process Date\n100,2025-05-01\n";

    fn ready_session() -> Session {
        let mut session = Session::new();
        session.load_roster(ROSTER.as_bytes()).unwrap();
        session
    }

    #[test]
    fn flows_wait_for_the_roster() {
        let mut session = Session::new();
        for kind in FlowKind::ALL {
            assert_eq!(session.flow(kind).stage(), FlowStage::WaitingForRoster);
        }

        let err = session.upload(FlowKind::Awards, AWARDS.as_bytes()).unwrap_err();
        assert!(matches!(err, EtlError::RosterNotLoaded));
        assert_eq!(
            session.flow(FlowKind::Awards).stage(),
            FlowStage::WaitingForRoster
        );
    }

    #[test]
    fn loading_the_roster_opens_both_flows() {
        let session = ready_session();
        assert_eq!(session.roster().map(Roster::len), Some(3));
        for kind in FlowKind::ALL {
            assert_eq!(
                session.flow(kind).stage(),
                FlowStage::WaitingForTransactionalFile
            );
        }
    }

    #[test]
    fn both_flows_reach_exportable() {
        let mut session = ready_session();
        session.upload(FlowKind::Awards, AWARDS.as_bytes()).unwrap();
        session.upload(FlowKind::Proposals, PROPOSALS.as_bytes()).unwrap();

        for kind in FlowKind::ALL {
            let flow = session.flow(kind);
            assert_eq!(flow.stage(), FlowStage::Exportable);
            assert!(flow.failure().is_none());
            assert_eq!(session.preview(kind).unwrap().height(), 1);
            assert_eq!(&session.export(kind).unwrap()[0..2], b"PK");
        }
    }

    #[test]
    fn a_failing_flow_leaves_the_other_alone() {
        let mut session = ready_session();
        session.upload(FlowKind::Proposals, PROPOSALS.as_bytes()).unwrap();

        let bad_dates = "Award PI Campus ID,Award Finalize Date\n100,someday\n";
        let err = session.upload(FlowKind::Awards, bad_dates.as_bytes()).unwrap_err();
        assert!(matches!(err, EtlError::DateCoercion { .. }));

        let awards = session.flow(FlowKind::Awards);
        assert_eq!(awards.stage(), FlowStage::Enriched);
        assert!(awards.table().is_none());
        assert_eq!(awards.failure().map(|f| f.reached), Some(FlowStage::Enriched));
        assert!(session.export(FlowKind::Awards).is_err());

        let proposals = session.flow(FlowKind::Proposals);
        assert_eq!(proposals.stage(), FlowStage::Exportable);
        assert!(proposals.table().is_some());
    }

    #[test]
    fn unparseable_upload_stops_before_loaded() {
        let mut session = ready_session();
        let err = session
            .upload(FlowKind::Awards, &[0xC3, 0x28, 0xA0, 0xA1])
            .unwrap_err();
        assert!(matches!(err, EtlError::Parse(_)));
        assert_eq!(
            session.flow(FlowKind::Awards).stage(),
            FlowStage::WaitingForTransactionalFile
        );
    }

    #[test]
    fn a_new_upload_replaces_the_previous_table() {
        let mut session = ready_session();
        session.upload(FlowKind::Awards, AWARDS.as_bytes()).unwrap();

        let two_rows = "Award PI Campus ID,Award Finalize Date\n100,2025-08-01\n200,2025-02-01\n";
        let table = session.upload(FlowKind::Awards, two_rows.as_bytes()).unwrap();
        assert_eq!(table.frame().height(), 2);
        assert_eq!(
            session.flow(FlowKind::Awards).table().map(|t| t.frame().height()),
            Some(2)
        );
    }

    #[test]
    fn replacing_the_roster_resets_flows() {
        let mut session = ready_session();
        session.upload(FlowKind::Awards, AWARDS.as_bytes()).unwrap();

        session.load_roster(ROSTER.as_bytes()).unwrap();
        assert!(session.flow(FlowKind::Awards).table().is_none());
        assert_eq!(
            session.flow(FlowKind::Awards).stage(),
            FlowStage::WaitingForTransactionalFile
        );

        assert!(session.load_roster(b"").is_err());
        assert!(session.roster().is_none());
        assert_eq!(
            session.flow(FlowKind::Proposals).stage(),
            FlowStage::WaitingForRoster
        );
    }

    #[test]
    fn roster_missing_department_is_rejected() {
        let mut session = Session::new();
        let err = session
            .load_roster(b"Award PI Campus ID,Dept\n100,Genetics\n")
            .unwrap_err();
        assert!(matches!(err, EtlError::MissingColumn(ref c) if c == "Department"));
    }
}
