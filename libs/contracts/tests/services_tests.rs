use async_trait::async_trait;
use courier_contracts::{
    geo, mail, patient, user, GeoClient, GeoError, GeoService, Location, MailClient, MailError,
    MailService, PatientClient, PatientError, PatientRecord, PatientService, ReverseGeocodeRequest,
    Role, User, UserClient, UserError, UserService,
};
use courier_fabric::{
    broker::MemoryBroker, BrokerConnection, CallError, Client, ClientConfig, Listener,
    ListenerConfig,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Users kept in memory, keyed by username
#[derive(Default)]
struct Accounts {
    users: Mutex<HashMap<String, User>>,
}

#[async_trait]
impl UserService for Accounts {
    async fn find_by_username(&self, username: String) -> Result<User, UserError> {
        self.users
            .lock()
            .unwrap()
            .get(&username)
            .cloned()
            .ok_or_else(|| UserError::not_found(&username))
    }

    async fn persist(&self, user: User) -> Result<(), UserError> {
        let mut users = self.users.lock().unwrap();
        if users.values().any(|u| u.id == user.id) {
            return Err(UserError::DuplicatedId(format!("user {} exists", user.id)));
        }
        if users.contains_key(&user.username) {
            return Err(UserError::username_taken(&user.username));
        }
        if users.values().any(|u| u.email == user.email) {
            return Err(UserError::email_taken(&user.email));
        }
        users.insert(user.username.clone(), user);
        Ok(())
    }
}

#[derive(Default)]
struct Patients {
    records: Mutex<Vec<PatientRecord>>,
}

impl Patients {
    fn check(&self, record: &PatientRecord) -> Result<(), PatientError> {
        let records = self.records.lock().unwrap();
        if records.iter().any(|r| r.id == record.id) {
            return Err(PatientError::DuplicatedId("patient id exists".into()));
        }
        if record.national_id.is_some()
            && records.iter().any(|r| r.national_id == record.national_id)
        {
            return Err(PatientError::DuplicatedNationalId("national id exists".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl PatientService for Patients {
    async fn add_patient_record(&self, record: PatientRecord) -> Result<(), PatientError> {
        self.check(&record)?;
        self.records.lock().unwrap().push(record);
        Ok(())
    }

    async fn validate_unique_patient(&self, record: PatientRecord) -> Result<(), PatientError> {
        self.check(&record)
    }
}

struct Atlas;

#[async_trait]
impl GeoService for Atlas {
    async fn reverse_geocode(&self, request: ReverseGeocodeRequest) -> Result<Location, GeoError> {
        if request.lat == "40.7579554" && request.lon == "-73.9855319" {
            Ok(Location {
                osm_id: 8398124,
                lat: request.lat,
                lon: request.lon,
                display_name: "Manhattan, New York County".into(),
            })
        } else {
            Err(GeoError::failed())
        }
    }
}

struct Outbox {
    sent: mpsc::UnboundedSender<mail::SendMailRequest>,
}

#[async_trait]
impl MailService for Outbox {
    async fn send_mail(&self, request: mail::SendMailRequest) -> Result<(), MailError> {
        self.sent
            .send(request)
            .map_err(|err| MailError::Sending(err.to_string()))
    }
}

/// Helper to get a connection, a listener and a shared client
async fn setup() -> (BrokerConnection, Listener, Arc<Client>) {
    let broker = MemoryBroker::new();
    let connection = BrokerConnection::open(&broker, "memory://contracts")
        .await
        .unwrap();
    let listener = Listener::new(&connection, ListenerConfig::default()).await.unwrap();
    let client = Client::new(&connection, ClientConfig::default()).await.unwrap();
    (connection, listener, Arc::new(client))
}

fn jdoe() -> User {
    User {
        id: Uuid::new_v4(),
        username: "jdoe".into(),
        email: "jdoe@mail.com".into(),
        password: "$2a$12$hash".into(),
        role: Role::Patient,
    }
}

#[tokio::test]
async fn user_persist_then_find() {
    let (_connection, listener, client) = setup().await;
    user::serve(&listener, Arc::new(Accounts::default())).await.unwrap();
    let users = UserClient::new(client);

    let account = jdoe();
    users.persist(&account).await.unwrap();
    assert_eq!(users.find_by_username("jdoe").await.unwrap(), account);
}

#[tokio::test]
async fn user_errors_round_trip_as_domain_errors() {
    let (_connection, listener, client) = setup().await;
    user::serve(&listener, Arc::new(Accounts::default())).await.unwrap();
    let users = UserClient::new(client);

    let missing = users.find_by_username("ghost").await;
    assert!(matches!(missing, Err(CallError::Domain(UserError::NotFound(_)))));

    let account = jdoe();
    users.persist(&account).await.unwrap();

    let mut same_name = jdoe();
    same_name.email = "other@mail.com".into();
    let taken = users.persist(&same_name).await.unwrap_err();
    assert_eq!(
        taken.domain(),
        Some(&UserError::username_taken("jdoe"))
    );

    let mut same_email = jdoe();
    same_email.username = "jdoe2".into();
    let taken = users.persist(&same_email).await;
    assert!(matches!(taken, Err(CallError::Domain(UserError::DuplicatedEmail(_)))));

    let again = users.persist(&account).await;
    assert!(matches!(again, Err(CallError::Domain(UserError::DuplicatedId(_)))));
}

#[tokio::test]
async fn patient_validation_and_uniqueness() {
    let (_connection, listener, client) = setup().await;
    patient::serve(&listener, Arc::new(Patients::default())).await.unwrap();
    let patients = PatientClient::new(client);

    let record = PatientRecord {
        id: Uuid::new_v4(),
        national_id: Some("44051401458".into()),
    };
    patients.validate_unique_patient(&record).await.unwrap();
    patients.add_patient_record(&record).await.unwrap();

    let twin = PatientRecord {
        id: Uuid::new_v4(),
        national_id: record.national_id.clone(),
    };
    let duplicated = patients.validate_unique_patient(&twin).await;
    assert!(matches!(
        duplicated,
        Err(CallError::Domain(PatientError::DuplicatedNationalId(_)))
    ));

    let malformed = PatientRecord {
        id: Uuid::new_v4(),
        national_id: Some("12ab".into()),
    };
    let invalid = patients.add_patient_record(&malformed).await;
    assert!(matches!(
        invalid,
        Err(CallError::Domain(PatientError::InvalidNationalId(_)))
    ));
}

#[tokio::test]
async fn geo_success_and_internal_failure() {
    let (_connection, listener, client) = setup().await;
    geo::serve(&listener, Arc::new(Atlas)).await.unwrap();
    let geo = GeoClient::new(client).with_timeout(Duration::from_secs(1));

    let location = geo.reverse_geocode("40.7579554", "-73.9855319").await.unwrap();
    assert_eq!(location.osm_id, 8398124);

    let failed = geo.reverse_geocode("0", "0").await;
    assert!(matches!(failed, Err(CallError::Domain(ref e)) if *e == GeoError::failed()));
}

#[tokio::test]
async fn enabled_mail_client_reaches_the_mail_service() {
    let (_connection, listener, client) = setup().await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    mail::serve(&listener, Arc::new(Outbox { sent: tx })).await.unwrap();

    let mailer = MailClient::new(client, true);
    assert!(mailer.is_enabled());
    mailer
        .send_mail(vec!["jdoe@mail.com".into()], "welcome aboard")
        .await
        .unwrap();

    let received = rx.recv().await.unwrap();
    assert_eq!(received.to, vec!["jdoe@mail.com".to_string()]);
    assert_eq!(received.msg, "welcome aboard");
}

#[tokio::test]
async fn idle_mail_client_sends_nothing() {
    let (_connection, listener, client) = setup().await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    mail::serve(&listener, Arc::new(Outbox { sent: tx })).await.unwrap();

    let mailer = MailClient::new(client, false);
    mailer
        .send_mail(vec!["jdoe@mail.com".into()], "never sent")
        .await
        .unwrap();

    let nothing = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
    assert!(nothing.is_err());
}
