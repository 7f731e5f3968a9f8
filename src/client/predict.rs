//! Optimistic prediction.
//!
//! Runs the server's own engine against the client's filtered view. Tiles
//! whose affiliation is withheld are revealed without guessing an outcome;
//! the next snapshot fills in the rest.

use std::collections::BTreeMap;

use crate::game::command::Command;
use crate::game::engine::{apply, check_reveal, GameError};
use crate::game::state::{Affiliation, Session, Tile};
use crate::network::protocol::SessionSnapshot;

/// Provisional post-state for `command`, at the same version as `snapshot`.
///
/// An `Err` means the server will reject the command too, as far as the
/// client can tell.
pub fn predict(snapshot: &SessionSnapshot, command: &Command) -> Result<SessionSnapshot, GameError> {
    let shadow = shadow_session(snapshot);

    if let Command::RevealTile { player_id, position } = command {
        let hidden = snapshot
            .tiles
            .get(*position)
            .is_some_and(|t| !t.revealed && t.affiliation.is_none());
        if hidden {
            check_reveal(&shadow, player_id, *position)?;
            let mut predicted = snapshot.clone();
            predicted.tiles[*position].revealed = true;
            return Ok(predicted);
        }
    }

    let transition = apply(&shadow, command)?;
    let next = transition.session;

    let mut predicted = snapshot.clone();
    predicted.players = next.players.into_values().collect();
    predicted.current_turn = next.current_turn;
    predicted.remaining = next.remaining;
    predicted.winner = next.winner;
    predicted.status = next.status;
    for (view, tile) in predicted.tiles.iter_mut().zip(&next.tiles) {
        if tile.revealed && !view.revealed {
            view.revealed = true;
            view.affiliation = Some(tile.affiliation);
        }
    }
    Ok(predicted)
}

/// Rebuild an engine session from a filtered snapshot. Hidden affiliations
/// become neutral placeholders and are never read back.
fn shadow_session(snapshot: &SessionSnapshot) -> Session {
    let tiles = snapshot
        .tiles
        .iter()
        .map(|view| Tile {
            position: view.position,
            word: view.word.clone(),
            affiliation: view.affiliation.unwrap_or(Affiliation::Neutral),
            revealed: view.revealed,
        })
        .collect();

    let players: BTreeMap<_, _> = snapshot
        .players
        .iter()
        .map(|p| (p.id.clone(), p.clone()))
        .collect();

    Session {
        id: snapshot.id.clone(),
        tiles,
        players,
        current_turn: snapshot.current_turn,
        remaining: snapshot.remaining,
        winner: snapshot.winner,
        status: snapshot.status,
        version: snapshot.version,
        created_at: snapshot.created_at,
        updated_at: snapshot.updated_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::engine::MoveRejection;
    use crate::game::state::{sample_session, Player, PlayerId, Role, SessionStatus, Team};

    fn lobby() -> Session {
        let mut session = sample_session("predict");
        for (id, team, role) in [
            ("a1", Team::TeamA, Role::Operative),
            ("aspy", Team::TeamA, Role::Spymaster),
            ("b1", Team::TeamB, Role::Operative),
        ] {
            session.players.insert(PlayerId::new(id), Player {
                id: PlayerId::new(id),
                display_name: id.into(),
                team: Some(team),
                role,
            });
        }
        session
    }

    fn reveal(id: &str, position: usize) -> Command {
        Command::RevealTile { player_id: PlayerId::new(id), position }
    }

    #[test]
    fn test_hidden_reveal_only_flips_tile() {
        let session = lobby();
        let view = SessionSnapshot::for_viewer(&session, Some(&PlayerId::new("a1")));

        let predicted = predict(&view, &reveal("a1", 20)).unwrap();
        assert!(predicted.tiles[20].revealed);
        assert_eq!(predicted.tiles[20].affiliation, None);
        assert_eq!(predicted.current_turn, Team::TeamA);
        assert_eq!(predicted.remaining, view.remaining);
        assert_eq!(predicted.version, view.version);
    }

    #[test]
    fn test_full_view_resolves_like_the_server() {
        let session = lobby();
        let view = SessionSnapshot::full(&session);

        let predicted = predict(&view, &reveal("a1", 20)).unwrap();
        let actual = apply(&session, &reveal("a1", 20)).unwrap().session;

        assert_eq!(predicted.current_turn, actual.current_turn);
        assert_eq!(predicted.tiles[20].affiliation, Some(Affiliation::Neutral));
        assert_eq!(predicted.version, view.version);

        let predicted = predict(&view, &reveal("a1", 24)).unwrap();
        assert_eq!(predicted.status, SessionStatus::Finished);
        assert_eq!(predicted.winner, Some(Team::TeamB));
    }

    #[test]
    fn test_end_turn_and_join_predicted() {
        let session = lobby();
        let view = SessionSnapshot::for_viewer(&session, None);

        let predicted = predict(&view, &Command::EndTurn { player_id: PlayerId::new("a1") }).unwrap();
        assert_eq!(predicted.current_turn, Team::TeamB);

        let join = Command::JoinTeam {
            player_id: PlayerId::new("new"),
            display_name: "New".into(),
            team: Some(Team::TeamB),
        };
        let predicted = predict(&view, &join).unwrap();
        assert!(predicted.player(&PlayerId::new("new")).is_some());
    }

    #[test]
    fn test_rejections_predicted() {
        let session = lobby();
        let view = SessionSnapshot::for_viewer(&session, None);

        assert_eq!(
            predict(&view, &reveal("b1", 3)),
            Err(GameError::InvalidMove(MoveRejection::NotYourTurn))
        );
        assert_eq!(
            predict(&view, &reveal("aspy", 3)),
            Err(GameError::InvalidMove(MoveRejection::SpymasterForbidden))
        );
        assert_eq!(
            predict(&view, &reveal("a1", 99)),
            Err(GameError::InvalidMove(MoveRejection::NoSuchTile))
        );
    }
}
