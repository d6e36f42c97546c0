use std::{
    net::{IpAddr, Ipv4Addr},
    sync::Arc,
};

use async_trait::async_trait;
use rearch::CapsuleHandle;
use serde::Serialize;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::url_repo::{ClickEvent, UrlRecord, UrlRepository, timestamp_now, url_repository_capsule};

const SIMULATED_REFERRER: &str = "Direct";
const SIMULATED_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));
const SIMULATED_IP: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UrlStats {
    pub count: usize,
    pub total_clicks: u64,
    /// `total_clicks / count`, rounded half up; 0 for an empty collection.
    pub average_clicks: u64,
    pub most_clicked: Option<UrlRecord>,
}

/// One slice of the click-distribution chart.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ClickShare {
    pub label: String,
    pub value: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Dashboard {
    pub urls: Vec<UrlRecord>,
    pub stats: UrlStats,
    pub distribution: Vec<ClickShare>,
}

impl From<Vec<UrlRecord>> for Dashboard {
    fn from(urls: Vec<UrlRecord>) -> Self {
        Self {
            stats: aggregates(&urls),
            distribution: click_distribution(&urls),
            urls,
        }
    }
}

#[must_use]
pub fn aggregates(urls: &[UrlRecord]) -> UrlStats {
    let count = urls.len();
    let total_clicks = urls
        .iter()
        .fold(0_u64, |total, url| total.saturating_add(url.clicks));

    let average_clicks = match u128::try_from(count) {
        Ok(0) | Err(_) => 0,
        Ok(count) => {
            let rounded = (2 * u128::from(total_clicks) + count) / (2 * count);
            u64::try_from(rounded).unwrap_or(u64::MAX)
        }
    };

    // NOTE: ties keep the earlier record
    let most_clicked = urls
        .iter()
        .fold(None, |most: Option<&UrlRecord>, url| match most {
            Some(most) if most.clicks >= url.clicks => Some(most),
            _ => Some(url),
        })
        .cloned();

    UrlStats {
        count,
        total_clicks,
        average_clicks,
        most_clicked,
    }
}

#[must_use]
pub fn click_distribution(urls: &[UrlRecord]) -> Vec<ClickShare> {
    urls.iter()
        .map(|url| ClickShare {
            label: url.shortcode.clone(),
            value: url.clicks,
        })
        .collect()
}

pub fn stats_service_capsule(
    CapsuleHandle { mut get, .. }: CapsuleHandle,
) -> Arc<dyn StatsService> {
    let url_repo = Arc::clone(get.as_ref(url_repository_capsule));
    Arc::new(StatsServiceImpl { url_repo })
}

/// Every mutation loads the whole collection, changes it, and writes the whole collection back.
/// Unknown ids are ignored.
#[async_trait]
pub trait StatsService: Send + Sync {
    /// All records in stored order, most recent first.
    async fn list(&self) -> anyhow::Result<Vec<UrlRecord>>;
    async fn dashboard(&self) -> anyhow::Result<Dashboard>;
    async fn delete_record(&self, id: Uuid) -> anyhow::Result<Dashboard>;
    async fn simulate_click(&self, id: Uuid) -> anyhow::Result<Dashboard>;
}

struct StatsServiceImpl {
    url_repo: Arc<dyn UrlRepository>,
}

#[async_trait]
impl StatsService for StatsServiceImpl {
    #[instrument(skip(self))]
    async fn list(&self) -> anyhow::Result<Vec<UrlRecord>> {
        self.url_repo.load_urls().await
    }

    #[instrument(skip(self))]
    async fn dashboard(&self) -> anyhow::Result<Dashboard> {
        Ok(self.list().await?.into())
    }

    #[instrument(skip(self))]
    async fn delete_record(&self, id: Uuid) -> anyhow::Result<Dashboard> {
        let mut urls = self.url_repo.load_urls().await?;
        let count_before = urls.len();
        urls.retain(|url| url.id != id);

        if urls.len() == count_before {
            debug!("No record to delete");
        } else {
            info!("Deleted record");
        }

        self.url_repo.save_urls(&urls).await?;
        Ok(urls.into())
    }

    #[instrument(skip(self))]
    async fn simulate_click(&self, id: Uuid) -> anyhow::Result<Dashboard> {
        let mut urls = self.url_repo.load_urls().await?;

        if let Some(url) = urls.iter_mut().find(|url| url.id == id) {
            url.clicks = url.clicks.saturating_add(1);
            url.click_details.push(ClickEvent {
                timestamp: timestamp_now(),
                referrer: SIMULATED_REFERRER.to_owned(),
                user_agent: SIMULATED_USER_AGENT.to_owned(),
                ip: SIMULATED_IP,
            });
            info!(clicks = url.clicks, "Simulated click");
        } else {
            debug!("No record to click");
        }

        self.url_repo.save_urls(&urls).await?;
        Ok(urls.into())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use mockall::mock;
    use time::{Duration, OffsetDateTime};

    use crate::url_repo::InMemoryUrlRepository;

    use super::*;

    mock! {
        UrlRepository {}

        #[async_trait]
        impl UrlRepository for UrlRepository {
            async fn load_urls(&self) -> anyhow::Result<Vec<UrlRecord>>;
            async fn save_urls(&self, urls: &[UrlRecord]) -> anyhow::Result<()>;
        }
    }

    fn new_url_record(shortcode: &str, clicks: u64) -> UrlRecord {
        let created_at = timestamp_now();
        UrlRecord {
            id: Uuid::new_v4(),
            original_url: "https://example.com/".to_owned(),
            shortcode: shortcode.to_owned(),
            short_url: format!("http://localhost:3000/{shortcode}"),
            created_at,
            expiry_at: None,
            clicks,
            click_details: (0..clicks)
                .map(|_| ClickEvent {
                    timestamp: created_at,
                    referrer: SIMULATED_REFERRER.to_owned(),
                    user_agent: SIMULATED_USER_AGENT.to_owned(),
                    ip: SIMULATED_IP,
                })
                .collect(),
        }
    }

    #[test]
    fn test_aggregates_empty() {
        assert_eq!(
            aggregates(&[]),
            UrlStats {
                count: 0,
                total_clicks: 0,
                average_clicks: 0,
                most_clicked: None,
            }
        );
    }

    #[test]
    fn test_aggregates() {
        let urls = vec![
            new_url_record("a", 1),
            new_url_record("b", 4),
            new_url_record("c", 0),
        ];
        let stats = aggregates(&urls);

        assert_eq!(stats.count, 3);
        assert_eq!(stats.total_clicks, 5);
        // 5 / 3 = 1.67
        assert_eq!(stats.average_clicks, 2);
        assert_eq!(stats.most_clicked, Some(urls[1].clone()));
    }

    #[test]
    fn test_aggregates_average_rounds_half_up() {
        let urls = vec![new_url_record("a", 1), new_url_record("b", 2)];
        assert_eq!(aggregates(&urls).average_clicks, 2);

        let urls = vec![
            new_url_record("a", 1),
            new_url_record("b", 0),
            new_url_record("c", 0),
        ];
        assert_eq!(aggregates(&urls).average_clicks, 0);
    }

    #[test]
    fn test_aggregates_most_clicked_tie_goes_to_first() {
        let urls = vec![
            new_url_record("a", 0),
            new_url_record("b", 3),
            new_url_record("c", 3),
        ];
        assert_eq!(aggregates(&urls).most_clicked, Some(urls[1].clone()));

        let untouched = vec![new_url_record("x", 0), new_url_record("y", 0)];
        assert_eq!(
            aggregates(&untouched).most_clicked,
            Some(untouched[0].clone())
        );
    }

    #[test]
    fn test_click_distribution_includes_zero_click_records() {
        let urls = vec![new_url_record("a", 2), new_url_record("b", 0)];
        assert_eq!(
            click_distribution(&urls),
            vec![
                ClickShare {
                    label: "a".to_owned(),
                    value: 2,
                },
                ClickShare {
                    label: "b".to_owned(),
                    value: 0,
                },
            ]
        );
        assert!(click_distribution(&[]).is_empty());
    }

    #[tokio::test]
    async fn test_list_keeps_stored_order() {
        let urls = vec![new_url_record("newest", 0), new_url_record("oldest", 0)];
        let service = StatsServiceImpl {
            url_repo: Arc::new(InMemoryUrlRepository::new(urls.clone())),
        };
        assert_eq!(service.list().await.unwrap(), urls);
    }

    #[tokio::test]
    async fn test_simulate_click_three_times() {
        let target = new_url_record("target", 0);
        let other = new_url_record("other", 0);
        let repo = Arc::new(InMemoryUrlRepository::new(vec![
            target.clone(),
            other.clone(),
        ]));
        let service = StatsServiceImpl {
            url_repo: repo.clone(),
        };

        let before = OffsetDateTime::now_utc();
        for _ in 0..3 {
            service.simulate_click(target.id).await.unwrap();
        }

        let stored = repo.stored_urls();
        assert_eq!(stored[0].clicks, 3);
        assert_eq!(stored[0].click_details.len(), 3);
        for click in &stored[0].click_details {
            assert_eq!(click.referrer, "Direct");
            assert_eq!(click.ip, IpAddr::V4(Ipv4Addr::LOCALHOST));
            assert!((click.timestamp - before).abs() <= Duration::seconds(1));
        }
        assert_eq!(stored[1], other);
    }

    #[tokio::test]
    async fn test_simulate_click_recomputes_dashboard() {
        let target = new_url_record("target", 2);
        let service = StatsServiceImpl {
            url_repo: Arc::new(InMemoryUrlRepository::new(vec![
                new_url_record("busy", 2),
                target.clone(),
            ])),
        };

        let dashboard = service.simulate_click(target.id).await.unwrap();

        assert_eq!(dashboard.stats.total_clicks, 5);
        assert_eq!(
            dashboard.stats.most_clicked.map(|url| url.shortcode),
            Some("target".to_owned())
        );
        assert_eq!(dashboard.distribution[1].value, 3);
    }

    #[tokio::test]
    async fn test_simulate_click_unknown_id() {
        let urls = vec![new_url_record("a", 1)];
        let repo = Arc::new(InMemoryUrlRepository::new(urls.clone()));
        let service = StatsServiceImpl {
            url_repo: repo.clone(),
        };

        let dashboard = service.simulate_click(Uuid::new_v4()).await.unwrap();

        assert_eq!(dashboard.urls, urls);
        assert_eq!(repo.stored_urls(), urls);
    }

    #[tokio::test]
    async fn test_delete_record() {
        let doomed = new_url_record("doomed", 4);
        let kept = vec![new_url_record("a", 1), new_url_record("b", 2)];
        let repo = Arc::new(InMemoryUrlRepository::new(vec![
            kept[0].clone(),
            doomed.clone(),
            kept[1].clone(),
        ]));
        let service = StatsServiceImpl {
            url_repo: repo.clone(),
        };

        let before = service.dashboard().await.unwrap();
        let after = service.delete_record(doomed.id).await.unwrap();

        assert_eq!(before.stats.count, 3);
        assert_eq!(before.stats.total_clicks, 7);
        assert_eq!(after.stats.count, 2);
        assert_eq!(after.stats.total_clicks, 3);
        assert_eq!(after.stats.most_clicked, Some(kept[1].clone()));
        assert_eq!(after.urls, kept);
        assert_eq!(repo.stored_urls(), kept);
    }

    #[tokio::test]
    async fn test_delete_last_record() {
        let only = new_url_record("only", 1);
        let service = StatsServiceImpl {
            url_repo: Arc::new(InMemoryUrlRepository::new(vec![only.clone()])),
        };

        let dashboard = service.delete_record(only.id).await.unwrap();

        assert!(dashboard.urls.is_empty());
        assert_eq!(dashboard.stats, aggregates(&[]));
        assert!(dashboard.distribution.is_empty());
    }

    #[tokio::test]
    async fn test_delete_record_unknown_id() {
        let urls = vec![new_url_record("a", 0)];
        let mut mock_repo = MockUrlRepository::new();
        mock_repo.expect_load_urls().once().return_once({
            let urls = urls.clone();
            move || Ok(urls)
        });
        mock_repo
            .expect_save_urls()
            .withf({
                let urls = urls.clone();
                move |saved| saved.to_vec() == urls
            })
            .once()
            .returning(|_| Ok(()));

        let service = StatsServiceImpl {
            url_repo: Arc::new(mock_repo),
        };
        let dashboard = service.delete_record(Uuid::new_v4()).await.unwrap();
        assert_eq!(dashboard.urls, urls);
    }

    #[tokio::test]
    async fn test_simulate_click_load_error() {
        let mut mock_repo = MockUrlRepository::new();
        mock_repo
            .expect_load_urls()
            .once()
            .return_once(|| Err(anyhow::anyhow!("test error")));

        let service = StatsServiceImpl {
            url_repo: Arc::new(mock_repo),
        };
        let err = service.simulate_click(Uuid::new_v4()).await.unwrap_err();
        assert_eq!(err.to_string(), "test error");
    }
}
