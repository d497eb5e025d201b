// SPDX-FileCopyrightText: 2026 Waflow Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Conversation router: turns transport events into contacts, tickets,
//! messages, and realtime notifications, and dispatches outbound sends.

use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use waflow_core::types::{
    CloseCause, ConnectionStatus, DeliveryStatus, NormalizedMessage, OutboundContent,
    SendReceipt, TicketStatus, TransportEvent,
};
use waflow_core::{AgentId, ConnectionId, TenantId, TicketId, WaflowError};
use waflow_notify::{Event, EventName, Notifier, Scope};
use waflow_storage::queries::{agents, connections, contacts, departments, messages, tickets};
use waflow_storage::{Database, MessageRow, TicketRow};
use waflow_transport::{qr_terminal, SessionRegistry};

use crate::locks::KeyedLocks;

pub struct Router {
    db: Database,
    notifier: Notifier,
    registry: SessionRegistry,
    locks: KeyedLocks,
}

/// An outbound send request, normally arriving through the gateway.
pub struct SendRequest {
    pub tenant_id: TenantId,
    pub connection_id: ConnectionId,
    pub ticket_id: Option<TicketId>,
    /// Required when no ticket is given; otherwise resolved from the
    /// ticket's contact.
    pub recipient: Option<String>,
    pub agent_id: Option<AgentId>,
    pub content: OutboundContent,
}

#[derive(Debug)]
pub struct SendOutcome {
    pub receipt: SendReceipt,
    /// Persisted row, present when the send was tied to a ticket.
    pub message: Option<MessageRow>,
}

fn snippet(message: &NormalizedMessage) -> String {
    if message.body.is_empty() {
        format!("[{}]", message.kind)
    } else {
        message.body.clone()
    }
}

fn ticket_payload(ticket: &TicketRow) -> Value {
    json!({
        "ticket_id": ticket.id.0,
        "ticket_number": ticket.ticket_number,
        "tenant_id": ticket.tenant_id.0,
        "contact_id": ticket.contact_id.0,
        "connection_id": ticket.connection_id.0,
        "status": ticket.status,
        "priority": ticket.priority,
        "assigned_agent_id": ticket.assigned_agent_id.map(|a| a.0),
        "department_id": ticket.department_id,
        "unread_messages": ticket.unread_messages,
        "last_message": ticket.last_message,
        "transfer_count": ticket.transfer_count,
    })
}

fn message_payload(message: &MessageRow) -> Value {
    json!({
        "message_id": message.id,
        "ticket_id": message.ticket_id.0,
        "contact_id": message.contact_id.0,
        "connection_id": message.connection_id.0,
        "agent_id": message.agent_id.map(|a| a.0),
        "body": message.body,
        "kind": message.kind,
        "direction": message.direction,
        "status": message.status,
        "media_url": message.media_url,
        "error_message": message.error_message,
    })
}

impl Router {
    pub fn new(db: Database, notifier: Notifier, registry: SessionRegistry) -> Self {
        Self {
            db,
            notifier,
            registry,
            locks: KeyedLocks::new(),
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Consume the shared transport event stream until every sender hangs
    /// up. Event failures are logged and dropped; the loop never dies.
    pub async fn run(&self, mut events: mpsc::Receiver<TransportEvent>) {
        while let Some(event) = events.recv().await {
            if let Err(e) = self.apply(event).await {
                error!(error = %e, "failed to apply transport event");
            }
        }
        info!("transport event stream closed, router loop exiting");
    }

    async fn apply(&self, event: TransportEvent) -> Result<(), WaflowError> {
        match event {
            TransportEvent::QrChallenge {
                connection_id,
                tenant_id,
                code,
            } => {
                connections::set_status(&self.db, connection_id, ConnectionStatus::QrPending)
                    .await?;
                if let Some(art) = qr_terminal(&code) {
                    info!(%connection_id, "scan to pair:\n{art}");
                }
                self.notifier.publish(
                    &Scope::Tenant(tenant_id),
                    Event::new(
                        EventName::ConnectionQr,
                        json!({"connection_id": connection_id.0, "code": code}),
                    ),
                );
                Ok(())
            }
            TransportEvent::SessionOpened {
                connection_id,
                tenant_id,
                phone_number,
                display_name,
            } => {
                connections::record_session_open(&self.db, connection_id, &phone_number).await?;
                self.notifier.publish(
                    &Scope::Tenant(tenant_id),
                    Event::new(
                        EventName::ConnectionStatus,
                        json!({
                            "connection_id": connection_id.0,
                            "status": ConnectionStatus::Connected,
                            "phone_number": phone_number,
                            "display_name": display_name,
                        }),
                    ),
                );
                Ok(())
            }
            TransportEvent::SessionClosed {
                connection_id,
                tenant_id,
                cause,
            } => {
                let (status, last_error) = match &cause {
                    CloseCause::LoggedOut => {
                        (ConnectionStatus::Disconnected, Some("logged out".to_string()))
                    }
                    CloseCause::TransportLost => {
                        (ConnectionStatus::Error, Some("connection lost".to_string()))
                    }
                    CloseCause::Other(reason) => {
                        (ConnectionStatus::Disconnected, Some(reason.clone()))
                    }
                };
                connections::record_session_close(
                    &self.db,
                    connection_id,
                    status,
                    last_error.as_deref(),
                )
                .await?;
                self.notifier.publish(
                    &Scope::Tenant(tenant_id),
                    Event::new(
                        EventName::ConnectionStatus,
                        json!({
                            "connection_id": connection_id.0,
                            "status": status,
                            "last_error": last_error,
                        }),
                    ),
                );
                Ok(())
            }
            TransportEvent::MessageReceived {
                connection_id,
                tenant_id,
                message,
                ..
            } => self.handle_incoming(connection_id, tenant_id, message).await,
            TransportEvent::MessageStatus {
                connection_id,
                tenant_id,
                wire_message_id,
                status,
            } => {
                let affected = messages::update_status_by_wire_id(
                    &self.db,
                    connection_id,
                    &wire_message_id,
                    status,
                )
                .await?;
                if affected == 0 {
                    debug!(%connection_id, wire_message_id, "receipt for unknown message, ignored");
                    return Ok(());
                }
                if let Some(row) =
                    messages::find_by_wire_id(&self.db, tenant_id, &wire_message_id).await?
                {
                    self.notifier.publish(
                        &Scope::Ticket(row.ticket_id),
                        Event::new(
                            EventName::MessageStatus,
                            json!({
                                "message_id": row.id,
                                "ticket_id": row.ticket_id.0,
                                "status": status,
                            }),
                        ),
                    );
                }
                Ok(())
            }
        }
    }

    /// Route one inbound message: resolve the contact, reuse or open the
    /// ticket, persist, and notify. Serialized per (tenant, phone).
    pub async fn handle_incoming(
        &self,
        connection_id: ConnectionId,
        tenant_id: TenantId,
        message: NormalizedMessage,
    ) -> Result<(), WaflowError> {
        let _guard = self.locks.acquire(tenant_id, &message.sender_phone).await;

        if !message.external_id.is_empty()
            && messages::find_by_wire_id(&self.db, tenant_id, &message.external_id)
                .await?
                .is_some()
        {
            debug!(wire_message_id = %message.external_id, "duplicate inbound message, skipped");
            return Ok(());
        }

        let contact =
            contacts::find_or_create(&self.db, tenant_id, &message.sender_phone, message.sender_name.as_deref())
                .await?;
        if let Some(name) = &message.sender_name {
            contacts::adopt_display_name(&self.db, contact.id, name).await?;
        }

        let (ticket, created) =
            match tickets::find_active_for_contact(&self.db, tenant_id, contact.id).await? {
                Some(ticket) => (ticket, false),
                None => {
                    let connection = connections::get_connection(&self.db, connection_id)
                        .await?
                        .ok_or(WaflowError::NotFound {
                            entity: "connection",
                            id: connection_id.to_string(),
                        })?;
                    let department_id = match connection.default_department_id {
                        Some(id) => Some(id),
                        None => departments::default_for_tenant(&self.db, tenant_id)
                            .await?
                            .map(|d| d.id),
                    };
                    let ticket = tickets::create_ticket(
                        &self.db,
                        tickets::NewTicket {
                            tenant_id,
                            contact_id: contact.id,
                            connection_id,
                            department_id,
                            chat_id: message.chat_id.clone(),
                        },
                    )
                    .await?;
                    contacts::increment_tickets(&self.db, contact.id).await?;
                    info!(
                        ticket_number = ticket.ticket_number,
                        contact = %message.sender_phone,
                        "opened ticket for new conversation"
                    );
                    (ticket, true)
                }
            };

        let mut new = messages::NewMessage::inbound(tenant_id, ticket.id, contact.id, connection_id);
        new.wire_message_id =
            (!message.external_id.is_empty()).then(|| message.external_id.clone());
        new.body = (!message.body.is_empty()).then(|| message.body.clone());
        new.kind = message.kind;
        new.media_url = message.media_ref.clone();
        new.media_type = message.media_type.clone();
        new.wire_timestamp = Some(message.timestamp);
        let row = messages::insert_message(&self.db, new).await?;

        let text = snippet(&message);
        tickets::record_inbound(&self.db, ticket.id, Some(&text)).await?;
        contacts::record_message(&self.db, contact.id).await?;
        connections::increment_received(&self.db, connection_id).await?;

        self.notifier.publish(
            &Scope::Ticket(ticket.id),
            Event::new(EventName::MessageNew, message_payload(&row)),
        );
        let refreshed = tickets::get_ticket(&self.db, ticket.id)
            .await?
            .unwrap_or(ticket);
        self.notifier.publish(
            &Scope::Tenant(tenant_id),
            Event::new(
                if created {
                    EventName::TicketNew
                } else {
                    EventName::TicketUpdated
                },
                ticket_payload(&refreshed),
            ),
        );
        Ok(())
    }

    /// Dispatch an outbound message through the connection's transport,
    /// persisting the result when the send belongs to a ticket.
    pub async fn send_message(&self, request: SendRequest) -> Result<SendOutcome, WaflowError> {
        let session = self
            .registry
            .get(request.tenant_id, request.connection_id)
            .ok_or_else(|| {
                WaflowError::transport(format!(
                    "no active session for connection {}",
                    request.connection_id
                ))
            })?;

        let ticket = match request.ticket_id {
            Some(id) => {
                let ticket = tickets::get_ticket(&self.db, id)
                    .await?
                    .filter(|t| t.tenant_id == request.tenant_id)
                    .ok_or(WaflowError::NotFound {
                        entity: "ticket",
                        id: id.to_string(),
                    })?;
                Some(ticket)
            }
            None => None,
        };

        let recipient = match (&request.recipient, &ticket) {
            (Some(recipient), _) => recipient.clone(),
            (None, Some(ticket)) => {
                let contact = contacts::get_contact(&self.db, ticket.contact_id)
                    .await?
                    .ok_or(WaflowError::NotFound {
                        entity: "contact",
                        id: ticket.contact_id.to_string(),
                    })?;
                contact.phone_number
            }
            (None, None) => {
                return Err(WaflowError::Validation(
                    "either a recipient or a ticket id is required".to_string(),
                ))
            }
        };

        let result = session
            .transport
            .send(request.connection_id, &recipient, &request.content)
            .await;

        let Some(ticket) = ticket else {
            return result.map(|receipt| SendOutcome {
                receipt,
                message: None,
            });
        };

        match result {
            Ok(receipt) => {
                self.ack_inbound(&session, &ticket, &recipient).await;

                let mut new = messages::NewMessage::outbound(
                    request.tenant_id,
                    ticket.id,
                    ticket.contact_id,
                    request.connection_id,
                );
                new.status = receipt.status;
                new.agent_id = request.agent_id;
                new.wire_message_id = Some(receipt.wire_message_id.clone());
                new.kind = request.content.kind();
                let body = request.content.body_text();
                new.body = (!body.is_empty()).then_some(body.clone());
                new.media_url = request.content.media_ref().map(str::to_string);
                new.media_type = request.content.mime().map(str::to_string);
                new.wire_timestamp = Some(receipt.timestamp);
                let row = messages::insert_message(&self.db, new).await?;

                let text = if body.is_empty() {
                    format!("[{}]", request.content.kind())
                } else {
                    body
                };
                tickets::record_outbound(&self.db, ticket.id, Some(&text)).await?;
                connections::increment_sent(&self.db, request.connection_id).await?;

                if tickets::mark_first_response(&self.db, ticket.id).await? {
                    if let Some(updated) = tickets::get_ticket(&self.db, ticket.id).await? {
                        self.notifier.publish(
                            &Scope::Tenant(request.tenant_id),
                            Event::new(EventName::TicketUpdated, ticket_payload(&updated)),
                        );
                    }
                }
                self.notifier.publish(
                    &Scope::Ticket(ticket.id),
                    Event::new(EventName::MessageNew, message_payload(&row)),
                );
                Ok(SendOutcome {
                    receipt,
                    message: Some(row),
                })
            }
            Err(e) => {
                // The failure is part of the conversation record.
                let mut new = messages::NewMessage::outbound(
                    request.tenant_id,
                    ticket.id,
                    ticket.contact_id,
                    request.connection_id,
                );
                new.status = DeliveryStatus::Failed;
                new.agent_id = request.agent_id;
                new.kind = request.content.kind();
                let body = request.content.body_text();
                new.body = (!body.is_empty()).then_some(body);
                new.media_url = request.content.media_ref().map(str::to_string);
                new.error_message = Some(e.to_string());
                match messages::insert_message(&self.db, new).await {
                    Ok(row) => {
                        self.notifier.publish(
                            &Scope::Ticket(ticket.id),
                            Event::new(EventName::MessageNew, message_payload(&row)),
                        );
                    }
                    Err(persist_err) => {
                        error!(error = %persist_err, "failed to persist failed send");
                    }
                }
                Err(e)
            }
        }
    }

    /// Best-effort read acknowledgement of the ticket's inbound backlog,
    /// locally and on the wire.
    async fn ack_inbound(
        &self,
        session: &waflow_transport::SessionHandle,
        ticket: &TicketRow,
        recipient: &str,
    ) {
        let pending = match messages::unread_inbound_wire_ids(&self.db, ticket.id).await {
            Ok(ids) => ids,
            Err(e) => {
                warn!(error = %e, "could not list unread inbound messages");
                return;
            }
        };
        if pending.is_empty() {
            return;
        }
        let chat = if ticket.chat_id.is_empty() {
            recipient.to_string()
        } else {
            ticket.chat_id.clone()
        };
        if let Err(e) = session
            .transport
            .mark_read(ticket.connection_id, &chat, &pending)
            .await
        {
            debug!(error = %e, "wire read ack failed");
        }
        if let Err(e) = messages::mark_inbound_read(&self.db, ticket.id).await {
            warn!(error = %e, "could not mark inbound messages read");
        }
    }

    /// Close a ticket (or resolve it), settling the assigned agent's
    /// counters. Closing an already-terminal ticket is a no-op.
    pub async fn close_ticket(
        &self,
        tenant_id: TenantId,
        ticket_id: TicketId,
        status: TicketStatus,
        closed_by: Option<AgentId>,
        reason: Option<&str>,
    ) -> Result<TicketRow, WaflowError> {
        if status.is_active() {
            return Err(WaflowError::Validation(format!(
                "{status} is not a terminal ticket status"
            )));
        }
        let current = self.ticket_for_tenant(tenant_id, ticket_id).await?;
        if !current.status.is_active() {
            return Ok(current);
        }

        let before = tickets::close_ticket(&self.db, ticket_id, status, closed_by, reason).await?;
        if let Some(agent_id) = before.assigned_agent_id {
            agents::adjust_active(&self.db, agent_id, -1).await?;
            agents::increment_handled(&self.db, agent_id).await?;
        }

        let closed = self.ticket_for_tenant(tenant_id, ticket_id).await?;
        let event = Event::new(EventName::TicketClosed, ticket_payload(&closed));
        let mut scopes = vec![Scope::Tenant(tenant_id), Scope::Ticket(ticket_id)];
        if let Some(agent_id) = before.assigned_agent_id {
            scopes.push(Scope::Agent(agent_id));
        }
        self.notifier.publish_all(&scopes, &event);
        Ok(closed)
    }

    /// Move a ticket to another agent and/or department.
    pub async fn transfer_ticket(
        &self,
        tenant_id: TenantId,
        ticket_id: TicketId,
        to_agent: Option<AgentId>,
        to_department: Option<i64>,
    ) -> Result<TicketRow, WaflowError> {
        let current = self.ticket_for_tenant(tenant_id, ticket_id).await?;
        if !current.status.is_active() {
            return Err(WaflowError::Conflict(format!(
                "ticket {} is {}, cannot transfer",
                current.ticket_number, current.status
            )));
        }

        let before = tickets::transfer_ticket(&self.db, ticket_id, to_agent, to_department).await?;
        self.settle_assignment(before.assigned_agent_id, to_agent)
            .await?;

        let transferred = self.ticket_for_tenant(tenant_id, ticket_id).await?;
        let event = Event::new(EventName::TicketTransferred, ticket_payload(&transferred));
        let mut scopes = vec![Scope::Tenant(tenant_id), Scope::Ticket(ticket_id)];
        if let Some(agent_id) = to_agent {
            scopes.push(Scope::Agent(agent_id));
        }
        self.notifier.publish_all(&scopes, &event);
        Ok(transferred)
    }

    /// Apply a partial update. A terminal status change is routed through
    /// the close path so the close metadata gets stamped exactly once.
    pub async fn update_ticket(
        &self,
        tenant_id: TenantId,
        ticket_id: TicketId,
        mut changes: tickets::TicketChanges,
    ) -> Result<TicketRow, WaflowError> {
        let current = self.ticket_for_tenant(tenant_id, ticket_id).await?;

        if let Some(status) = changes.status {
            if !status.is_active() {
                changes.status = None;
                let new_assignee = changes.assigned_agent_id;
                if changes.priority.is_some()
                    || changes.department_id.is_some()
                    || new_assignee.is_some()
                {
                    tickets::update_ticket(&self.db, ticket_id, changes).await?;
                }
                if let Some(assignee) = new_assignee {
                    self.settle_assignment(current.assigned_agent_id, assignee)
                        .await?;
                }
                return self
                    .close_ticket(tenant_id, ticket_id, status, None, None)
                    .await;
            }
        }

        let new_assignee = changes.assigned_agent_id;
        let updated = tickets::update_ticket(&self.db, ticket_id, changes).await?;
        if let Some(assignee) = new_assignee {
            self.settle_assignment(current.assigned_agent_id, assignee)
                .await?;
        }

        self.notifier.publish_all(
            &[Scope::Tenant(tenant_id), Scope::Ticket(ticket_id)],
            &Event::new(EventName::TicketUpdated, ticket_payload(&updated)),
        );
        Ok(updated)
    }

    /// Move active-workload counters when a ticket changes hands.
    async fn settle_assignment(
        &self,
        previous: Option<AgentId>,
        next: Option<AgentId>,
    ) -> Result<(), WaflowError> {
        if previous == next {
            return Ok(());
        }
        if let Some(old) = previous {
            agents::adjust_active(&self.db, old, -1).await?;
        }
        if let Some(new) = next {
            agents::adjust_active(&self.db, new, 1).await?;
        }
        Ok(())
    }

    async fn ticket_for_tenant(
        &self,
        tenant_id: TenantId,
        ticket_id: TicketId,
    ) -> Result<TicketRow, WaflowError> {
        tickets::get_ticket(&self.db, ticket_id)
            .await?
            .filter(|t| t.tenant_id == tenant_id)
            .ok_or(WaflowError::NotFound {
                entity: "ticket",
                id: ticket_id.to_string(),
            })
    }
}
